//! Audit logging
//!
//! Append-only trail of provisioning and session lifecycle actions. Audit
//! writes never fail the surrounding operation; a failed append is logged
//! and dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::AuditRepository;

/// Audited actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "stage.created")]
    StageCreated,
    #[serde(rename = "channel.created")]
    ChannelCreated,
    #[serde(rename = "session.started")]
    SessionStarted,
    #[serde(rename = "session.ended")]
    SessionEnded,
    #[serde(rename = "session.force_ended_reconcile")]
    SessionForceEndedReconcile,
    #[serde(rename = "channel.key_reset")]
    ChannelKeyReset,
    #[serde(rename = "stream.force_stopped")]
    StreamForceStopped,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StageCreated => "stage.created",
            Self::ChannelCreated => "channel.created",
            Self::SessionStarted => "session.started",
            Self::SessionEnded => "session.ended",
            Self::SessionForceEndedReconcile => "session.force_ended_reconcile",
            Self::ChannelKeyReset => "channel.key_reset",
            Self::StreamForceStopped => "stream.force_stopped",
        }
    }
}

/// Audited resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResourceType {
    Stage,
    Channel,
    Session,
    Stream,
}

impl AuditResourceType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Channel => "channel",
            Self::Session => "session",
            Self::Stream => "stream",
        }
    }
}

/// One append-only audit row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub resource_type: AuditResourceType,
    pub resource_id: String,
    pub user_id: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Audit writer over the append-only store
#[derive(Clone)]
pub struct AuditService {
    repository: Arc<dyn AuditRepository>,
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService").finish()
    }
}

impl AuditService {
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Record an audit event. Best effort: failures are logged, not raised.
    pub async fn record(
        &self,
        action: AuditAction,
        resource_type: AuditResourceType,
        resource_id: impl Into<String>,
        user_id: impl Into<String>,
        details: serde_json::Value,
    ) {
        let entry = AuditEntry {
            action,
            resource_type,
            resource_id: resource_id.into(),
            user_id: user_id.into(),
            details,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.repository.append(&entry).await {
            tracing::warn!(
                action = entry.action.as_str(),
                resource_id = %entry.resource_id,
                "Failed to append audit entry: {e}"
            );
        } else {
            tracing::debug!(
                action = entry.action.as_str(),
                resource_type = entry.resource_type.as_str(),
                resource_id = %entry.resource_id,
                "Audit entry recorded"
            );
        }
    }
}
