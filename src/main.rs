mod bot;
mod cli;
mod config;
mod conversation;
mod credentials;
mod demo;
mod error;
mod event;
mod ledger;
mod logging;
mod notify;
mod ui;
mod workflow;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use bot::Dispatcher;
use cli::{Cli, Command};
use config::AppConfig;
use event::InboundEvent;
use ledger::{JsonDir, LedgerStore, Persistence};
use notify::{ConsoleNotifier, Notifier};
use ui::LedgerView;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    logging::init_logging(&config.log, cli.verbose);

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.state_dir));

    match cli.command {
        Command::Serve => serve(config, state_dir).await,
        Command::Demo => demo::run(config).await,
        Command::Status { user_id } => {
            let store = open_store(&state_dir)?;
            let view = LedgerView::new();
            match store.find_account(user_id).await {
                Some(account) => view.print_account(&account),
                None => println!("No account for user {user_id}."),
            }
            Ok(())
        }
        Command::Pending => {
            let store = open_store(&state_dir)?;
            LedgerView::new().print_pending(&store.pending_review().await);
            Ok(())
        }
    }
}

fn open_store(state_dir: &Path) -> Result<LedgerStore<JsonDir>> {
    let persistence = JsonDir::open(state_dir)
        .with_context(|| format!("failed to open state dir {}", state_dir.display()))?;
    LedgerStore::open(persistence).context("failed to load ledger")
}

/// One JSON event per line on stdin until EOF.
async fn serve(config: AppConfig, state_dir: PathBuf) -> Result<()> {
    if config.admin_id == 0 {
        warn!("admin_id is not set; admin actions will be refused");
    }
    let store = Arc::new(open_store(&state_dir)?);
    let dispatcher = Dispatcher::new(config, store, ConsoleNotifier::new());
    info!(state_dir = %state_dir.display(), "serving events from stdin");

    let handled = serve_lines(&dispatcher, BufReader::new(tokio::io::stdin())).await?;
    info!(handled, "input closed");
    Ok(())
}

/// Feeds every JSON line of `input` to the dispatcher and returns how many
/// events were handled. Malformed lines are logged and skipped.
async fn serve_lines<P, N, R>(dispatcher: &Dispatcher<P, N>, input: R) -> Result<u64>
where
    P: Persistence,
    N: Notifier,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut handled = 0u64;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match InboundEvent::from_json_line(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping malformed event");
                continue;
            }
        };
        // Failures were already reported to the sender.
        let _ = dispatcher.handle(event).await;
        handled += 1;
    }
    Ok(handled)
}
