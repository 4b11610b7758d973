//! Inbound events from the chat transport and the actions behind buttons.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{TaskId, TaskKind, UserId, WithdrawId, WithdrawMethod};
use crate::workflow::Decision;

/// Main menu entries, also recognised when typed as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuItem {
    Tasks,
    Balance,
    Withdraw,
    ReferralLink,
    Help,
}

impl MenuItem {
    pub const ALL: [MenuItem; 5] = [
        MenuItem::Tasks,
        MenuItem::Balance,
        MenuItem::Withdraw,
        MenuItem::ReferralLink,
        MenuItem::Help,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MenuItem::Tasks => "📝 Tasks",
            MenuItem::Balance => "💼 Balance",
            MenuItem::Withdraw => "💰 Withdraw",
            MenuItem::ReferralLink => "🔗 Referral Link",
            MenuItem::Help => "❓ Help",
        }
    }
}

/// Which record an admin decision points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionTarget {
    Task { user: UserId, id: TaskId },
    Withdraw { user: UserId, id: WithdrawId },
}

/// Payload of a button press. Serialized as its compact callback string,
/// e.g. `approve_task:1:1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    ChooseTask { kind: TaskKind },
    ChooseWithdraw { method: WithdrawMethod },
    SubmitTask { id: TaskId },
    CancelTask { id: TaskId },
    Decide { decision: Decision, target: DecisionTarget },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised action payload: {0:?}")]
pub struct ParseActionError(pub String);

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ChooseTask { kind } => write!(f, "task:{kind}"),
            Action::ChooseWithdraw { method } => write!(f, "withdraw:{method}"),
            Action::SubmitTask { id } => write!(f, "submit:{id}"),
            Action::CancelTask { id } => write!(f, "cancel:{id}"),
            Action::Decide { decision, target } => match target {
                DecisionTarget::Task { user, id } => write!(f, "{decision}_task:{user}:{id}"),
                DecisionTarget::Withdraw { user, id } => {
                    write!(f, "{decision}_withdraw:{user}:{id}")
                }
            },
        }
    }
}

impl TryFrom<String> for Action {
    type Error = ParseActionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

impl FromStr for Action {
    type Err = ParseActionError;

    /// Parses the compact callback form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = || ParseActionError(s.to_string());
        let (head, rest) = s.split_once(':').ok_or_else(fail)?;

        let action = match head {
            "task" => Action::ChooseTask {
                kind: TaskKind::from_name(rest).ok_or_else(fail)?,
            },
            "withdraw" => Action::ChooseWithdraw {
                method: WithdrawMethod::from_name(rest).ok_or_else(fail)?,
            },
            "submit" => Action::SubmitTask {
                id: rest.parse().map_err(|_| fail())?,
            },
            "cancel" => Action::CancelTask {
                id: rest.parse().map_err(|_| fail())?,
            },
            _ => {
                let (decision, record) = head.split_once('_').ok_or_else(fail)?;
                let decision = match decision {
                    "approve" => Decision::Approve,
                    "reject" => Decision::Reject,
                    _ => return Err(fail()),
                };
                let (user, id) = rest.split_once(':').ok_or_else(fail)?;
                let user: UserId = user.parse().map_err(|_| fail())?;
                let id: u64 = id.parse().map_err(|_| fail())?;
                let target = match record {
                    "task" => DecisionTarget::Task { user, id },
                    "withdraw" => DecisionTarget::Withdraw { user, id },
                    _ => return Err(fail()),
                };
                Action::Decide { decision, target }
            }
        };
        Ok(action)
    }
}

/// Everything the transport can hand us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Start {
        from: UserId,
        #[serde(default)]
        referrer: Option<UserId>,
    },
    Help {
        from: UserId,
    },
    /// Admin-only review listing.
    Pending {
        from: UserId,
    },
    Menu {
        from: UserId,
        item: MenuItem,
    },
    Text {
        from: UserId,
        content: String,
    },
    Pressed {
        from: UserId,
        action: Action,
    },
}

impl InboundEvent {
    pub fn sender(&self) -> UserId {
        match self {
            InboundEvent::Start { from, .. }
            | InboundEvent::Help { from }
            | InboundEvent::Pending { from }
            | InboundEvent::Menu { from, .. }
            | InboundEvent::Text { from, .. }
            | InboundEvent::Pressed { from, .. } => *from,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Start { .. } => "start",
            InboundEvent::Help { .. } => "help",
            InboundEvent::Pending { .. } => "pending",
            InboundEvent::Menu { .. } => "menu",
            InboundEvent::Text { .. } => "text",
            InboundEvent::Pressed { .. } => "pressed",
        }
    }

    /// Reads one JSON event, classifying `text` content the same way a typed
    /// chat message is classified.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        let event: InboundEvent = serde_json::from_str(line)?;
        Ok(event.classified())
    }

    /// Re-reads free text as a command or menu selection where it is one.
    pub fn classified(self) -> Self {
        match self {
            InboundEvent::Text { from, content } => Self::classify_text(from, &content),
            other => other,
        }
    }

    /// Turns a raw chat message into a command, a menu selection, or free text.
    ///
    /// A malformed `/start` argument is dropped rather than rejected.
    pub fn classify_text(from: UserId, text: &str) -> Self {
        let trimmed = text.trim();
        let mut words = trimmed.split_whitespace();
        match words.next() {
            Some("/start") => {
                return InboundEvent::Start {
                    from,
                    referrer: words.next().and_then(|w| w.parse().ok()),
                };
            }
            Some("/help") => return InboundEvent::Help { from },
            Some("/pending") => return InboundEvent::Pending { from },
            _ => {}
        }

        if let Some(item) = MenuItem::ALL.into_iter().find(|m| m.label() == trimmed) {
            return InboundEvent::Menu { from, item };
        }
        if trimmed.to_lowercase().contains("balance") {
            return InboundEvent::Menu {
                from,
                item: MenuItem::Balance,
            };
        }
        InboundEvent::Text {
            from,
            content: trimmed.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_callback_roundtrip() {
        let actions = [
            Action::ChooseTask {
                kind: TaskKind::Facebook,
            },
            Action::ChooseWithdraw {
                method: WithdrawMethod::Binance,
            },
            Action::SubmitTask { id: 7 },
            Action::CancelTask { id: 7 },
            Action::Decide {
                decision: Decision::Approve,
                target: DecisionTarget::Task { user: -100123, id: 4 },
            },
            Action::Decide {
                decision: Decision::Reject,
                target: DecisionTarget::Withdraw { user: 55, id: 2 },
            },
        ];
        for action in actions {
            let encoded = action.to_string();
            assert_eq!(encoded.parse::<Action>().unwrap(), action, "{encoded}");
        }
    }

    #[test]
    fn callback_encoding_is_compact() {
        let action = Action::Decide {
            decision: Decision::Reject,
            target: DecisionTarget::Withdraw { user: 55, id: 2 },
        };
        assert_eq!(action.to_string(), "reject_withdraw:55:2");
    }

    #[test]
    fn malformed_callbacks_are_errors() {
        for raw in [
            "",
            "task:twitter",
            "submit:abc",
            "approve_task:1",
            "approve_order:1:2",
            "delete_task:1:2",
            "withdraw:paypal",
        ] {
            assert!(raw.parse::<Action>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn classify_commands() {
        assert_eq!(
            InboundEvent::classify_text(5, "/start 42"),
            InboundEvent::Start {
                from: 5,
                referrer: Some(42)
            }
        );
        assert_eq!(
            InboundEvent::classify_text(5, "/start abc"),
            InboundEvent::Start {
                from: 5,
                referrer: None
            }
        );
        assert_eq!(
            InboundEvent::classify_text(5, "/help"),
            InboundEvent::Help { from: 5 }
        );
    }

    #[test]
    fn classify_menu_labels_and_free_text() {
        assert_eq!(
            InboundEvent::classify_text(5, "💰 Withdraw"),
            InboundEvent::Menu {
                from: 5,
                item: MenuItem::Withdraw
            }
        );
        assert_eq!(
            InboundEvent::classify_text(5, "what is my Balance?"),
            InboundEvent::Menu {
                from: 5,
                item: MenuItem::Balance
            }
        );
        assert_eq!(
            InboundEvent::classify_text(5, "  me@gmail.com hunter2 "),
            InboundEvent::Text {
                from: 5,
                content: "me@gmail.com hunter2".into()
            }
        );
    }

    #[test]
    fn events_deserialize_from_json_lines() {
        let ev: InboundEvent =
            serde_json::from_str(r#"{"type":"text","from":1,"content":"200"}"#).unwrap();
        assert_eq!(ev.sender(), 1);
        assert_eq!(ev.kind(), "text");

        let ev: InboundEvent =
            serde_json::from_str(r#"{"type":"pressed","from":9,"action":"approve_task:1:1"}"#)
                .unwrap();
        assert_eq!(
            ev,
            InboundEvent::Pressed {
                from: 9,
                action: Action::Decide {
                    decision: Decision::Approve,
                    target: DecisionTarget::Task { user: 1, id: 1 }
                }
            }
        );

        let ev: InboundEvent = serde_json::from_str(r#"{"type":"start","from":3}"#).unwrap();
        assert_eq!(
            ev,
            InboundEvent::Start {
                from: 3,
                referrer: None
            }
        );
    }

    #[test]
    fn pressed_action_serializes_as_callback_string() {
        let ev = InboundEvent::Pressed {
            from: 4,
            action: Action::ChooseWithdraw {
                method: WithdrawMethod::Bank,
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"pressed","from":4,"action":"withdraw:bank"}"#);
        assert_eq!(serde_json::from_str::<InboundEvent>(&json).unwrap(), ev);

        let err = serde_json::from_str::<InboundEvent>(
            r#"{"type":"pressed","from":4,"action":"withdraw:paypal"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unrecognised action payload"));
    }

    #[test]
    fn json_text_lines_are_classified() {
        assert_eq!(
            InboundEvent::from_json_line(r#"{"type":"text","from":1,"content":"/start 42"}"#)
                .unwrap(),
            InboundEvent::Start {
                from: 1,
                referrer: Some(42)
            }
        );
        assert_eq!(
            InboundEvent::from_json_line(r#"{"type":"text","from":1,"content":"💼 Balance"}"#)
                .unwrap(),
            InboundEvent::Menu {
                from: 1,
                item: MenuItem::Balance
            }
        );
        assert_eq!(
            InboundEvent::from_json_line(r#"{"type":"text","from":1,"content":"250"}"#).unwrap(),
            InboundEvent::Text {
                from: 1,
                content: "250".into()
            }
        );
    }

    #[test]
    fn start_without_referrer_defaults() {
        let ev: InboundEvent = serde_json::from_str(r#"{"type":"start","from":3}"#).unwrap();
        assert_eq!(
            ev,
            InboundEvent::Start {
                from: 3,
                referrer: None
            }
        );
    }
}
