use tracing::warn;

use crate::error::LedgerError;
use crate::ledger::UserId;

/// Decides who may approve or reject submitted records.
pub trait AdminPolicy: Send + Sync {
    fn is_admin(&self, user: UserId) -> bool;
}

/// One configured admin chat. An id of zero means nobody is admin.
#[derive(Debug, Clone, Copy)]
pub struct SingleAdmin(pub UserId);

impl AdminPolicy for SingleAdmin {
    fn is_admin(&self, user: UserId) -> bool {
        self.0 != 0 && self.0 == user
    }
}

pub(crate) fn authorize(policy: &dyn AdminPolicy, actor: UserId) -> Result<(), LedgerError> {
    if policy.is_admin(actor) {
        Ok(())
    } else {
        warn!(actor, "admin action refused");
        Err(LedgerError::Unauthorized(actor))
    }
}
