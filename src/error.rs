use thiserror::Error;

use crate::ledger::{Amount, UserId};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} #{id} not found for user {user}")]
    NotFound {
        kind: RecordKind,
        user: UserId,
        id: u64,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(UserId),

    #[error("{kind} #{id} already processed ({status})")]
    AlreadyProcessed {
        kind: RecordKind,
        id: u64,
        status: String,
    },

    #[error("{kind} #{id} cannot move from {from} to {to}")]
    InvalidTransition {
        kind: RecordKind,
        id: u64,
        from: String,
        to: String,
    },

    #[error("User {0} is not allowed to take admin actions")]
    Unauthorized(UserId),

    #[error("Ledger inconsistency on account {user}: {detail}")]
    Inconsistency { user: UserId, detail: String },

    #[error("Amount overflow")]
    Overflow,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Errors scoped to a single event that the sender can act on.
    /// Everything else is an internal fault worth an operator's attention.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation(_)
                | LedgerError::NotFound { .. }
                | LedgerError::AccountNotFound(_)
                | LedgerError::AlreadyProcessed { .. }
                | LedgerError::InvalidTransition { .. }
                | LedgerError::Unauthorized(_)
        )
    }
}

/// Input problems reported back to the user. The flow stays where it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid amount: {0:?}. Please send a number.")]
    InvalidAmount(String),

    #[error("Minimum amount is {minimum} {currency}.")]
    BelowMinimum { minimum: u64, currency: Currency },

    #[error("Insufficient balance: {required} PKR needed, {available} PKR available.")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Invalid format. Send: {expected}")]
    MalformedInput { expected: &'static str },
}

/// Which kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RecordKind {
    Task,
    Withdraw,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Task => write!(f, "Task"),
            RecordKind::Withdraw => write!(f, "Withdraw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Currency {
    Pkr,
    Usd,
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::Pkr => write!(f, "PKR"),
            Currency::Usd => write!(f, "USD"),
        }
    }
}
