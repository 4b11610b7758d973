mod auth;
mod referral;
mod task;
mod withdraw;

use serde::{Deserialize, Serialize};

pub(crate) use auth::authorize;
pub use auth::{AdminPolicy, SingleAdmin};
pub use task::TaskWorkflow;
pub use withdraw::WithdrawWorkflow;

/// What an admin can do with a submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Reject => write!(f, "reject"),
        }
    }
}
