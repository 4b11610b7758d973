//! One-level referral bonus paid when a referred user's task is approved.
//!
//! The cascade is only reachable from inside task approval, under the same
//! pair lock, so it fires exactly once per approved task.

use serde::Serialize;

use crate::error::LedgerError;
use crate::ledger::{Account, Amount, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferralCredit {
    pub referrer: UserId,
    pub referred: UserId,
    pub bonus: Amount,
}

/// Credits `bonus` to the direct referrer, if there is one and it exists.
/// The referrer's own referrer is never looked at.
pub(crate) fn cascade(
    referred: UserId,
    referrer: Option<&mut Account>,
    bonus: Amount,
) -> Result<Option<ReferralCredit>, LedgerError> {
    let Some(referrer) = referrer else {
        return Ok(None);
    };
    if bonus == 0 {
        return Ok(None);
    }
    referrer.credit_referral_bonus(bonus)?;
    Ok(Some(ReferralCredit {
        referrer: referrer.user_id(),
        referred,
        bonus,
    }))
}
