use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, TaskId};

/// The three task types offered in the tasks menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Generated,
    Own,
    Facebook,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Generated, TaskKind::Own, TaskKind::Facebook];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Generated => "generated",
            TaskKind::Own => "own",
            TaskKind::Facebook => "facebook",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    pub fn title(&self) -> &'static str {
        match self {
            TaskKind::Generated => "Generated Gmail",
            TaskKind::Own => "Provide your Gmail",
            TaskKind::Facebook => "Facebook 2FA",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user handed in. The shape depends on the task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Generated {
        email: String,
        password: String,
    },
    Own {
        email: String,
        password: String,
    },
    Facebook {
        facebook_id: String,
        email: String,
        password: String,
        two_factor_code: String,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Generated { .. } => TaskKind::Generated,
            TaskPayload::Own { .. } => TaskKind::Own,
            TaskPayload::Facebook { .. } => TaskKind::Facebook,
        }
    }

    /// Multi-line rendering used in the admin review message.
    pub fn describe(&self) -> String {
        match self {
            TaskPayload::Generated { email, password } | TaskPayload::Own { email, password } => {
                format!("Email: {email}\nPassword: {password}")
            }
            TaskPayload::Facebook {
                facebook_id,
                email,
                password,
                two_factor_code,
            } => format!(
                "Facebook ID: {facebook_id}\nEmail: {email}\nPassword: {password}\n2FA: {two_factor_code}"
            ),
        }
    }
}

/// Lifecycle of a task: draft → pending_admin → approved | rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    PendingAdmin,
    Approved,
    Rejected,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Approved | TaskStatus::Rejected)
    }

    /// Whether the reward of a task in this status sits in `hold`.
    pub fn is_held(&self) -> bool {
        matches!(self, TaskStatus::PendingAdmin)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Draft, TaskStatus::PendingAdmin)
                | (TaskStatus::PendingAdmin, TaskStatus::Approved)
                | (TaskStatus::PendingAdmin, TaskStatus::Rejected)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Draft => write!(f, "draft"),
            TaskStatus::PendingAdmin => write!(f, "pending_admin"),
            TaskStatus::Approved => write!(f, "approved"),
            TaskStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub reward: Amount,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, payload: TaskPayload, reward: Amount) -> Self {
        let now = Utc::now();
        Self {
            id,
            payload,
            reward,
            status: TaskStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}
