//! Command line interface, built on clap.
//!
//! [`Cli`] carries the [`Command`] subcommands and the global `--config`,
//! `--state-dir` and `--verbose` flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::ledger::UserId;

/// taskledger: task rewards, referrals and manually approved withdrawals.
#[derive(Debug, Parser)]
#[command(name = "taskledger", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "taskledger.toml")]
    pub config: PathBuf,

    /// Ledger directory. Overrides `state_dir` from the configuration.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Enables verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reads JSON events (one per line) from stdin and replies on stdout.
    Serve,

    /// Runs the demo scenarios against an in-memory ledger.
    Demo,

    /// Shows a user's balance, hold and history.
    Status {
        /// User id (chat id).
        #[arg(allow_negative_numbers = true)]
        user_id: UserId,
    },

    /// Lists tasks and withdrawals awaiting an admin decision.
    Pending,
}
