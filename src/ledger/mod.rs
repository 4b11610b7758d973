mod account;
mod persistence;
mod store;
mod task;
mod withdraw;

pub use account::Account;
pub use persistence::{InMemory, JsonDir, Persistence};
pub use store::{LedgerStore, PendingItem};
pub use task::{Task, TaskKind, TaskPayload, TaskStatus};
pub use withdraw::{NewWithdraw, WithdrawMethod, WithdrawRequest, WithdrawStatus};

/// Chat user id as issued by the transport.
pub type UserId = i64;
pub type TaskId = u64;
pub type WithdrawId = u64;
/// Whole PKR units.
pub type Amount = u64;
