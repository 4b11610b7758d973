use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, WithdrawId};
use crate::error::Currency;

/// Payout channels offered in the withdraw menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawMethod {
    Easypaisa,
    Jazzcash,
    Bank,
    Binance,
}

impl WithdrawMethod {
    pub const ALL: [WithdrawMethod; 4] = [
        WithdrawMethod::Easypaisa,
        WithdrawMethod::Jazzcash,
        WithdrawMethod::Bank,
        WithdrawMethod::Binance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawMethod::Easypaisa => "easypaisa",
            WithdrawMethod::Jazzcash => "jazzcash",
            WithdrawMethod::Bank => "bank",
            WithdrawMethod::Binance => "binance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WithdrawMethod::Easypaisa => "Easypaisa",
            WithdrawMethod::Jazzcash => "JazzCash",
            WithdrawMethod::Bank => "Bank",
            WithdrawMethod::Binance => "Binance (USD)",
        }
    }

    /// Unit the user types the amount in.
    pub fn currency(&self) -> Currency {
        match self {
            WithdrawMethod::Binance => Currency::Usd,
            _ => Currency::Pkr,
        }
    }
}

impl fmt::Display for WithdrawMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawStatus::Pending)
    }
}

impl fmt::Display for WithdrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawStatus::Pending => write!(f, "pending"),
            WithdrawStatus::Approved => write!(f, "approved"),
            WithdrawStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A payout request. Created directly in `Pending` with its principal
/// (`pkr_amount`) already moved from balance to hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: WithdrawId,
    pub method: WithdrawMethod,
    pub account_name: String,
    pub account_number: String,
    pub pkr_amount: Amount,
    /// Only set for Binance payouts.
    pub usd_amount: Option<Decimal>,
    pub status: WithdrawStatus,
    /// Token of the conversation flow that produced this request.
    pub draft_token: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to open a withdraw request, collected by the
/// multi-step conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWithdraw {
    pub method: WithdrawMethod,
    pub account_name: String,
    pub account_number: String,
    pub pkr_amount: Amount,
    pub usd_amount: Option<Decimal>,
    pub draft_token: Uuid,
}

impl WithdrawRequest {
    pub fn open(id: WithdrawId, new: NewWithdraw) -> Self {
        let now = Utc::now();
        Self {
            id,
            method: new.method,
            account_name: new.account_name,
            account_number: new.account_number,
            pkr_amount: new.pkr_amount,
            usd_amount: new.usd_amount,
            status: WithdrawStatus::Pending,
            draft_token: new.draft_token,
            created_at: now,
            updated_at: now,
        }
    }

    /// "200 PKR" or "1.5 USD (450 PKR)".
    pub fn amount_display(&self) -> String {
        match self.usd_amount {
            Some(usd) => format!("{usd} USD ({} PKR)", self.pkr_amount),
            None => format!("{} PKR", self.pkr_amount),
        }
    }
}
