//! Outbound messages and the transport that delivers them.
//!
//! [`ConsoleNotifier`] renders to stdout with `console` styling; a chat
//! adapter would implement [`Notifier`] the same way.

use std::future::Future;
use std::io::Write;

use console::Style;
use serde::Serialize;
use thiserror::Error;

use crate::event::Action;
use crate::ledger::UserId;

/// A button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Control {
    pub label: String,
    pub action: Action,
}

impl Control {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outbound {
    pub text: String,
    pub controls: Vec<Control>,
}

impl Outbound {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            controls: Vec::new(),
        }
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub fn with_controls(mut self, controls: impl IntoIterator<Item = Control>) -> Self {
        self.controls.extend(controls);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    User(UserId),
    Admin,
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::User(id) => write!(f, "user {id}"),
            Recipient::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers messages to users and to the admin chat.
///
/// Delivery is best-effort: callers log failures and carry on, so an error
/// here never undoes a ledger change.
pub trait Notifier: Send + Sync {
    fn send_to_user(
        &self,
        user: UserId,
        message: Outbound,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;

    fn send_to_admin(&self, message: Outbound)
    -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Prints each message as a block on stdout.
pub struct ConsoleNotifier {
    // Recipient line.
    header: Style,
    // Button labels.
    control: Style,
    // Callback payload, dimmed.
    dim: Style,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            control: Style::new().green(),
            dim: Style::new().dim(),
        }
    }
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self, recipient: Recipient, message: &Outbound) -> String {
        let mut out = format!("{} {}\n", self.header.apply_to("→"), self.header.apply_to(recipient));
        for line in message.text.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        for control in &message.controls {
            out.push_str(&format!(
                "  [{}] {}\n",
                self.control.apply_to(&control.label),
                self.dim.apply_to(control.action.to_string())
            ));
        }
        out
    }

    fn emit(&self, recipient: Recipient, message: &Outbound) -> Result<(), NotifyError> {
        let rendered = self.render(recipient, message);
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(rendered.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

impl Notifier for ConsoleNotifier {
    async fn send_to_user(&self, user: UserId, message: Outbound) -> Result<(), NotifyError> {
        self.emit(Recipient::User(user), &message)
    }

    async fn send_to_admin(&self, message: Outbound) -> Result<(), NotifyError> {
        self.emit(Recipient::Admin, &message)
    }
}
