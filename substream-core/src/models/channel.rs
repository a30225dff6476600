use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ChannelId, ChildId};

/// Channel liveness, driven exclusively by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelStatus {
    #[default]
    Inactive,
    Live,
}

impl ChannelStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Live => "LIVE",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "INACTIVE" => Ok(Self::Inactive),
            "LIVE" => Ok(Self::Live),
            other => Err(crate::Error::Internal(format!(
                "Unknown channel status: {other}"
            ))),
        }
    }
}

/// Durable per-child channel row.
///
/// Created lazily on the first provisioning call and never destroyed by the
/// core. Binds a child to its upstream stage and, on the legacy RTMPS path,
/// to a channel ARN, ingest endpoint, and encrypted stream key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub child_id: ChildId,
    pub stage_arn: Option<String>,
    pub legacy_channel_arn: Option<String>,
    pub legacy_ingest_endpoint: Option<String>,
    /// Stream key ciphertext (`iv:tag:data` hex). Legacy rows may still hold
    /// plaintext; reads must accept both, writes always encrypt.
    pub legacy_stream_key: Option<String>,
    pub status: ChannelStatus,
    pub last_live_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    #[must_use]
    pub fn new(child_id: ChildId) -> Self {
        let now = Utc::now();
        Self {
            id: ChannelId::new(),
            child_id,
            stage_arn: None,
            legacy_channel_arn: None,
            legacy_ingest_endpoint: None,
            legacy_stream_key: None,
            status: ChannelStatus::Inactive,
            last_live_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self.status, ChannelStatus::Live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        assert_eq!(
            ChannelStatus::parse(ChannelStatus::Live.as_str()).unwrap(),
            ChannelStatus::Live
        );
        assert!(ChannelStatus::parse("live").is_err());
    }

    #[test]
    fn test_new_channel_is_inactive() {
        let channel = Channel::new(ChildId::new());
        assert!(!channel.is_live());
        assert!(channel.stage_arn.is_none());
        assert!(channel.last_live_at.is_none());
    }
}
