use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ChannelId, ChildId, SessionId};

/// Stream session state.
///
/// ```text
///   ∅ ─start→ InProgress ─end→ Completed
///               │
///               ├─reconcile(upstream idle)→ Completed
///               └─force-stop(admin)───────→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(crate::Error::Internal(format!(
                "Unknown session status: {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Durable streaming attempt by a child.
///
/// At most one session per channel is `IN_PROGRESS` at any time; the session
/// manager enforces this with conditional row transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: SessionId,
    pub channel_id: ChannelId,
    pub child_id: ChildId,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl StreamSession {
    #[must_use]
    pub fn new(channel_id: ChannelId, child_id: ChildId) -> Self {
        Self {
            id: SessionId::new(),
            channel_id,
            child_id,
            status: SessionStatus::InProgress,
            started_at: Utc::now(),
            ended_at: None,
            error_message: None,
        }
    }

    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self.status, SessionStatus::InProgress)
    }
}
