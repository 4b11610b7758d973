//! Terminal output for the `status`, `pending` and `demo` subcommands.
//!
//! Styled with `console`. Bot messages themselves go through
//! [`ConsoleNotifier`](crate::notify::ConsoleNotifier).

use console::Style;

use crate::ledger::{Account, PendingItem, TaskStatus, WithdrawStatus};

pub struct LedgerView {
    // Section headings.
    heading: Style,
    // Spendable amounts (balance).
    green: Style,
    // Held amounts.
    yellow: Style,
    dim: Style,
}

impl Default for LedgerView {
    fn default() -> Self {
        Self {
            heading: Style::new().bold().underlined(),
            green: Style::new().green().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl LedgerView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heading(&self, title: &str) {
        println!();
        println!("{}", self.heading.apply_to(title));
    }

    /// One line per account: balance, hold and counters.
    pub fn account_line(&self, account: &Account) -> String {
        format!(
            "user {:<6} balance {} hold {} completed {} referrals {} earned {}",
            account.user_id(),
            self.green.apply_to(format!("{:>6}", account.balance())),
            self.yellow.apply_to(format!("{:>6}", account.hold())),
            account.tasks_completed(),
            account.referrals_count(),
            account.referral_earned(),
        )
    }

    pub fn print_accounts(&self, accounts: &[Account]) {
        for account in accounts {
            println!("  {}", self.account_line(account));
        }
    }

    /// Account with its task and withdraw history.
    pub fn print_account(&self, account: &Account) {
        println!("{}", self.account_line(account));
        if let Some(referrer) = account.referrer() {
            println!("  {}", self.dim.apply_to(format!("referred by {referrer}")));
        }
        for task in account.tasks() {
            let status = match task.status {
                TaskStatus::Approved => self.green.apply_to(task.status.to_string()),
                TaskStatus::PendingAdmin => self.yellow.apply_to(task.status.to_string()),
                _ => self.dim.apply_to(task.status.to_string()),
            };
            println!(
                "  task #{:<4} {:<20} {:>4} PKR  {status}",
                task.id,
                task.kind().title(),
                task.reward
            );
        }
        for request in account.withdraws() {
            let status = match request.status {
                WithdrawStatus::Approved => self.green.apply_to(request.status.to_string()),
                WithdrawStatus::Pending => self.yellow.apply_to(request.status.to_string()),
                WithdrawStatus::Rejected => self.dim.apply_to(request.status.to_string()),
            };
            println!(
                "  withdraw #{:<4} {:<14} {:<20} {status}",
                request.id,
                request.method.label(),
                request.amount_display()
            );
        }
    }

    /// Review listing as JSON, one record per item.
    pub fn print_pending(&self, items: &[PendingItem]) {
        if items.is_empty() {
            println!("{}", self.dim.apply_to("No pending items."));
            return;
        }
        println!(
            "{}",
            serde_json::to_string_pretty(items).unwrap_or_default()
        );
    }
}
