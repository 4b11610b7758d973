//! Which multi-step input flow a user is in, and what it has collected.
//!
//! One slot per user. Starting a flow replaces whatever was there, with a
//! fresh draft token; there is no stacking and no resuming.

use std::fmt;

use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ledger::{Amount, UserId, WithdrawMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationMode {
    #[default]
    Idle,
    AwaitingWithdrawAmount(WithdrawMethod),
    AwaitingAccountName(WithdrawMethod),
    AwaitingAccountNumber(WithdrawMethod),
    AwaitingOwnGmail,
    AwaitingFacebookDetails,
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationMode::Idle => write!(f, "idle"),
            ConversationMode::AwaitingWithdrawAmount(m) => write!(f, "awaiting_amount({m})"),
            ConversationMode::AwaitingAccountName(m) => write!(f, "awaiting_account_name({m})"),
            ConversationMode::AwaitingAccountNumber(m) => write!(f, "awaiting_account_number({m})"),
            ConversationMode::AwaitingOwnGmail => write!(f, "awaiting_own_gmail"),
            ConversationMode::AwaitingFacebookDetails => write!(f, "awaiting_facebook_details"),
        }
    }
}

/// Fields collected so far by a withdraw flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    /// Identifies this flow instance; makes request creation replay-safe.
    pub token: Uuid,
    pub pkr_amount: Option<Amount>,
    pub usd_amount: Option<Decimal>,
    pub account_name: Option<String>,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            token: Uuid::new_v4(),
            pkr_amount: None,
            usd_amount: None,
            account_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    pub mode: ConversationMode,
    pub draft: Draft,
}

#[derive(Debug, Default)]
pub struct ConversationTracker {
    slots: DashMap<UserId, Conversation>,
}

impl ConversationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; `Idle` for users never seen.
    pub fn get(&self, user: UserId) -> Conversation {
        self.slots
            .get(&user)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn mode(&self, user: UserId) -> ConversationMode {
        self.slots
            .get(&user)
            .map(|c| c.mode)
            .unwrap_or_default()
    }

    /// Starts `mode` with an empty draft, dropping any flow in progress.
    pub fn begin(&self, user: UserId, mode: ConversationMode) {
        if mode == ConversationMode::Idle {
            self.clear(user);
            return;
        }
        self.slots.insert(
            user,
            Conversation {
                mode,
                draft: Draft::default(),
            },
        );
    }

    /// Moves to `mode`, letting `update` fill in the draft. Only applies if
    /// the user is still on the flow identified by `token`.
    pub fn advance(
        &self,
        user: UserId,
        token: Uuid,
        mode: ConversationMode,
        update: impl FnOnce(&mut Draft),
    ) -> bool {
        match self.slots.get_mut(&user) {
            Some(mut slot) if slot.draft.token == token => {
                slot.mode = mode;
                update(&mut slot.draft);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&self, user: UserId) {
        self.slots.remove(&user);
    }

    /// Clears the slot only if it still belongs to the flow `token`.
    pub fn finish(&self, user: UserId, token: Uuid) {
        self.slots.remove_if(&user, |_, c| c.draft.token == token);
    }
}
