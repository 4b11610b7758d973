//! The per-user account aggregate.
//!
//! `balance` and `hold` are private: every change goes through one of the
//! checked money primitives below, and every task or withdraw status change
//! goes through a compare-and-set on the record's current status.
//!
//! # Invariant
//! `hold == Σ reward(pending_admin tasks) + Σ pkr_amount(pending withdraws)`.
//! [`Account::verify`] recomputes the right-hand side; the store runs it after
//! every mutation and refuses to commit an aggregate that fails it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::task::{Task, TaskPayload, TaskStatus};
use super::withdraw::{NewWithdraw, WithdrawRequest, WithdrawStatus};
use super::{Amount, TaskId, UserId, WithdrawId};
use crate::error::{LedgerError, RecordKind, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    user_id: UserId,
    balance: Amount,
    hold: Amount,
    tasks_completed: u32,
    referrer: Option<UserId>,
    referrals_count: u32,
    referral_earned: Amount,
    next_task_id: TaskId,
    next_withdraw_id: WithdrawId,
    tasks: BTreeMap<TaskId, Task>,
    withdraws: BTreeMap<WithdrawId, WithdrawRequest>,
    created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            hold: 0,
            tasks_completed: 0,
            referrer: None,
            referrals_count: 0,
            referral_earned: 0,
            next_task_id: 1,
            next_withdraw_id: 1,
            tasks: BTreeMap::new(),
            withdraws: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------
    // Read-only accessors
    // ------------------------------------------------------------

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn hold(&self) -> Amount {
        self.hold
    }

    pub fn tasks_completed(&self) -> u32 {
        self.tasks_completed
    }

    pub fn referrer(&self) -> Option<UserId> {
        self.referrer
    }

    pub fn referrals_count(&self) -> u32 {
        self.referrals_count
    }

    pub fn referral_earned(&self) -> Amount {
        self.referral_earned
    }

    #[cfg(test)]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[cfg(test)]
    pub fn withdraw(&self, id: WithdrawId) -> Option<&WithdrawRequest> {
        self.withdraws.get(&id)
    }

    pub fn withdraws(&self) -> impl Iterator<Item = &WithdrawRequest> {
        self.withdraws.values()
    }

    // ------------------------------------------------------------
    // Referral bookkeeping
    // ------------------------------------------------------------

    /// Records the referrer. Only the first call with a foreign id sticks.
    pub fn set_referrer(&mut self, referrer: UserId) -> bool {
        if self.referrer.is_some() || referrer == self.user_id {
            return false;
        }
        self.referrer = Some(referrer);
        true
    }

    pub fn record_referral(&mut self) {
        self.referrals_count = self.referrals_count.saturating_add(1);
    }

    /// Pays a referral bonus straight into `balance`.
    pub fn credit_referral_bonus(&mut self, bonus: Amount) -> Result<(), LedgerError> {
        let earned = self
            .referral_earned
            .checked_add(bonus)
            .ok_or(LedgerError::Overflow)?;
        self.credit(bonus)?;
        self.referral_earned = earned;
        Ok(())
    }

    // ------------------------------------------------------------
    // Money primitives
    // ------------------------------------------------------------

    /// balance += amount
    pub fn credit(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// hold += amount, without touching balance (submitted task rewards).
    pub fn reserve(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.hold = self.hold.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// balance → hold (withdraw principal).
    pub fn lock(&mut self, amount: Amount) -> Result<(), LedgerError> {
        if self.balance < amount {
            return Err(ValidationError::InsufficientBalance {
                required: amount,
                available: self.balance,
            }
            .into());
        }
        let hold = self.hold.checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.balance -= amount;
        self.hold = hold;
        Ok(())
    }

    /// hold -= amount. A shortfall means an earlier transition went wrong;
    /// it is reported, never clamped.
    pub fn release(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.hold = self.hold_after_release(amount)?;
        Ok(())
    }

    /// hold → balance.
    pub fn release_to_balance(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let hold = self.hold_after_release(amount)?;
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.hold = hold;
        self.balance = balance;
        Ok(())
    }

    fn hold_after_release(&self, amount: Amount) -> Result<Amount, LedgerError> {
        self.hold.checked_sub(amount).ok_or_else(|| {
            error!(
                user = self.user_id,
                hold = self.hold,
                amount,
                "hold shortfall while resolving a record"
            );
            LedgerError::Inconsistency {
                user: self.user_id,
                detail: format!("hold {} is less than the {} being released", self.hold, amount),
            }
        })
    }

    // ------------------------------------------------------------
    // Task records
    // ------------------------------------------------------------

    /// Stores a new draft task and returns it. Older drafts are discarded:
    /// a user works on one task at a time and drafts carry no money.
    pub fn add_task(&mut self, payload: TaskPayload, reward: Amount) -> &Task {
        self.tasks.retain(|_, t| t.status != TaskStatus::Draft);
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.tasks
            .entry(id)
            .or_insert_with(|| Task::new(id, payload, reward))
    }

    /// Moves a task from `from` to `to`, failing if it is anywhere else.
    pub fn update_task_status(
        &mut self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Task, LedgerError> {
        let user = self.user_id;
        let task = self.tasks.get_mut(&id).ok_or(LedgerError::NotFound {
            kind: RecordKind::Task,
            user,
            id,
        })?;

        if task.status.is_terminal() {
            return Err(LedgerError::AlreadyProcessed {
                kind: RecordKind::Task,
                id,
                status: task.status.to_string(),
            });
        }
        if task.status != from || !from.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                kind: RecordKind::Task,
                id,
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }

        task.status = to;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Deletes a task that has not been submitted yet.
    pub fn remove_draft(&mut self, id: TaskId) -> Result<Task, LedgerError> {
        let status = self
            .tasks
            .get(&id)
            .map(|t| t.status)
            .ok_or(LedgerError::NotFound {
                kind: RecordKind::Task,
                user: self.user_id,
                id,
            })?;

        match status {
            TaskStatus::Draft => self.tasks.remove(&id).ok_or(LedgerError::NotFound {
                kind: RecordKind::Task,
                user: self.user_id,
                id,
            }),
            s if s.is_terminal() => Err(LedgerError::AlreadyProcessed {
                kind: RecordKind::Task,
                id,
                status: s.to_string(),
            }),
            s => Err(LedgerError::InvalidTransition {
                kind: RecordKind::Task,
                id,
                from: s.to_string(),
                to: "cancelled".into(),
            }),
        }
    }

    // ------------------------------------------------------------
    // Withdraw records
    // ------------------------------------------------------------

    /// Opens a pending withdraw and locks its principal in one step.
    ///
    /// Idempotent on `draft_token`: a second call with the same token returns
    /// the existing request and `false` without debiting again.
    pub fn add_withdraw(&mut self, new: NewWithdraw) -> Result<(WithdrawRequest, bool), LedgerError> {
        if let Some(existing) = self
            .withdraws
            .values()
            .find(|w| w.draft_token == new.draft_token)
        {
            return Ok((existing.clone(), false));
        }

        self.lock(new.pkr_amount)?;
        let id = self.next_withdraw_id;
        self.next_withdraw_id += 1;
        let request = WithdrawRequest::open(id, new);
        self.withdraws.insert(id, request.clone());
        Ok((request, true))
    }

    pub fn update_withdraw_status(
        &mut self,
        id: WithdrawId,
        from: WithdrawStatus,
        to: WithdrawStatus,
    ) -> Result<WithdrawRequest, LedgerError> {
        let user = self.user_id;
        let request = self.withdraws.get_mut(&id).ok_or(LedgerError::NotFound {
            kind: RecordKind::Withdraw,
            user,
            id,
        })?;

        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyProcessed {
                kind: RecordKind::Withdraw,
                id,
                status: request.status.to_string(),
            });
        }
        if request.status != from || from == to {
            return Err(LedgerError::InvalidTransition {
                kind: RecordKind::Withdraw,
                id,
                from: request.status.to_string(),
                to: to.to_string(),
            });
        }

        request.status = to;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    pub fn record_task_completed(&mut self) {
        self.tasks_completed = self.tasks_completed.saturating_add(1);
    }

    // ------------------------------------------------------------
    // Invariant
    // ------------------------------------------------------------

    /// Σ held task rewards + Σ pending withdraw principals.
    pub fn expected_hold(&self) -> Option<Amount> {
        let tasks = self
            .tasks
            .values()
            .filter(|t| t.status.is_held())
            .try_fold(0u64, |acc, t| acc.checked_add(t.reward))?;
        self.withdraws
            .values()
            .filter(|w| w.status == WithdrawStatus::Pending)
            .try_fold(tasks, |acc, w| acc.checked_add(w.pkr_amount))
    }

    pub fn verify(&self) -> Result<(), LedgerError> {
        match self.expected_hold() {
            Some(expected) if expected == self.hold => Ok(()),
            Some(expected) => Err(LedgerError::Inconsistency {
                user: self.user_id,
                detail: format!("hold is {} but pending records add up to {}", self.hold, expected),
            }),
            None => Err(LedgerError::Overflow),
        }
    }
}
