use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::StreamId;

/// Capability set granted by a participant token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParticipantCapability {
    Publish,
    Subscribe,
}

/// Short-lived participant credential bound to a stage.
///
/// Returned to the caller, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantGrant {
    pub token: String,
    pub participant_id: String,
    pub expires_at: DateTime<Utc>,
    pub capabilities: Vec<ParticipantCapability>,
    pub stage_arn: String,
    pub attributes: HashMap<String, String>,
}

/// In-memory pool entry for a pre-created upstream stage.
///
/// Invariant: `in_use` ⇔ `stream_id` is set ⇔ `allocated_at` is set, and no
/// two entries share a `stream_id`. Only the pool mutates these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PooledStage {
    pub arn: String,
    pub name: String,
    /// When the allocator believes the upstream resource was created
    pub created_at: DateTime<Utc>,
    pub in_use: bool,
    pub stream_id: Option<StreamId>,
    pub allocated_at: Option<DateTime<Utc>>,
}

impl PooledStage {
    #[must_use]
    pub fn idle(arn: String, name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            arn,
            name,
            created_at,
            in_use: false,
            stream_id: None,
            allocated_at: None,
        }
    }

    pub fn mark_allocated(&mut self, stream_id: StreamId) {
        self.in_use = true;
        self.stream_id = Some(stream_id);
        self.allocated_at = Some(Utc::now());
    }

    pub fn clear_allocation(&mut self) {
        self.in_use = false;
        self.stream_id = None;
        self.allocated_at = None;
    }

    /// Age of an idle entry, used by the cleanup pass
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Result of a successful publisher allocation
#[derive(Debug, Clone, Serialize)]
pub struct StageAllocation {
    pub stage_arn: String,
    pub stage_name: String,
    pub stream_id: StreamId,
    pub publish_token: String,
    pub participant_id: String,
    pub expires_at: DateTime<Utc>,
    pub whip_url: String,
    pub region: String,
}

/// Result of a subscribe-token mint (no pool state touched)
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeAllocation {
    pub stage_arn: String,
    pub token: String,
    pub participant_id: String,
    pub expires_at: DateTime<Utc>,
    pub region: String,
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub available: usize,
    pub in_use: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_coherence() {
        let mut entry = PooledStage::idle("arn:a".into(), "kid-stream-1".into(), Utc::now());
        assert!(!entry.in_use && entry.stream_id.is_none() && entry.allocated_at.is_none());

        entry.mark_allocated(StreamId::from("S1"));
        assert!(entry.in_use && entry.stream_id.is_some() && entry.allocated_at.is_some());

        entry.clear_allocation();
        assert!(!entry.in_use && entry.stream_id.is_none() && entry.allocated_at.is_none());
    }

    #[test]
    fn test_age() {
        let created = Utc::now() - chrono::Duration::hours(2);
        let entry = PooledStage::idle("arn:a".into(), "kid-stream-1".into(), created);
        assert!(entry.age(Utc::now()) >= chrono::Duration::hours(2));
    }
}
