//! taskledger configuration, loaded from `taskledger.toml`.
//!
//! [`AppConfig`] holds rewards, withdraw rules and the admin id. Missing
//! keys fall back to defaults. `ADMIN_CHAT_ID` in the environment wins over
//! the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::ledger::{Amount, TaskKind, UserId};

/// Top-level configuration read from `taskledger.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Chat id of the single admin. Zero disables every admin decision.
    #[serde(default)]
    pub admin_id: UserId,

    /// Bot name used in referral links.
    #[serde(default = "default_bot_username")]
    pub bot_username: String,

    /// Directory holding one JSON file per account.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default)]
    pub rewards: RewardConfig,

    #[serde(default)]
    pub withdraw: WithdrawConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Per-kind task rewards and the referral bonus, in PKR.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_task_reward")]
    pub generated: Amount,
    #[serde(default = "default_task_reward")]
    pub own: Amount,
    #[serde(default = "default_facebook_reward")]
    pub facebook: Amount,
    #[serde(default = "default_referral_bonus")]
    pub referral_bonus: Amount,
    /// Review time shown to users. Informational only.
    #[serde(default = "default_review_minutes")]
    pub review_minutes: u32,
}

/// Limits and exchange rate for the withdraw flow.
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawConfig {
    #[serde(default = "default_min_pkr")]
    pub min_pkr: Amount,
    #[serde(default = "default_min_usd")]
    pub min_usd: u64,
    #[serde(default = "default_pkr_per_usd")]
    pub pkr_per_usd: Amount,
    /// Processing time shown to users. Informational only.
    #[serde(default = "default_processing_hours")]
    pub processing_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_bot_username() -> String {
    "TaskLedgerBot".to_string()
}

fn default_state_dir() -> String {
    "state".to_string()
}

// 40 PKR for both Gmail tasks.
fn default_task_reward() -> Amount {
    40
}

fn default_facebook_reward() -> Amount {
    12
}

fn default_referral_bonus() -> Amount {
    2
}

fn default_review_minutes() -> u32 {
    30
}

fn default_min_pkr() -> Amount {
    200
}

fn default_min_usd() -> u64 {
    1
}

fn default_pkr_per_usd() -> Amount {
    300
}

fn default_processing_hours() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            generated: default_task_reward(),
            own: default_task_reward(),
            facebook: default_facebook_reward(),
            referral_bonus: default_referral_bonus(),
            review_minutes: default_review_minutes(),
        }
    }
}

impl RewardConfig {
    pub fn for_kind(&self, kind: TaskKind) -> Amount {
        match kind {
            TaskKind::Generated => self.generated,
            TaskKind::Own => self.own,
            TaskKind::Facebook => self.facebook,
        }
    }
}

impl Default for WithdrawConfig {
    fn default() -> Self {
        Self {
            min_pkr: default_min_pkr(),
            min_usd: default_min_usd(),
            pkr_per_usd: default_pkr_per_usd(),
            processing_hours: default_processing_hours(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            admin_id: 0,
            bot_username: default_bot_username(),
            state_dir: default_state_dir(),
            rewards: RewardConfig::default(),
            withdraw: WithdrawConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the configuration at `path`, or the defaults if there is no file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        // The environment overrides the file for the admin id.
        if let Ok(raw) = std::env::var("ADMIN_CHAT_ID") {
            config.apply_admin_override(&raw);
        }

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str::<AppConfig>(contents).context("invalid taskledger.toml")
    }

    fn apply_admin_override(&mut self, raw: &str) {
        match raw.trim().parse::<UserId>() {
            Ok(id) => self.admin_id = id,
            Err(_) if raw.trim().is_empty() => {}
            Err(_) => warn!(value = raw, "ignoring non-numeric ADMIN_CHAT_ID"),
        }
    }
}
