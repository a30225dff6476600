//! Durable row stores
//!
//! Each store is a trait so the core can run against Postgres in production
//! and against in-memory maps in tests and local development. Session status
//! transitions are conditional updates keyed on the expected source state,
//! which is what makes them linearizable under horizontal scale-out.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Channel, ChannelId, ChannelStatus, ChildId, ChildProfile, SessionCursor, SessionId,
    SessionStatus, StreamSession, UserId,
};
use crate::service::audit::AuditEntry;
use crate::Result;

pub use memory::{
    InMemoryAuditRepository, InMemoryChannelRepository, InMemoryProfileRepository,
    InMemorySessionRepository,
};
pub use postgres::{
    PgAuditRepository, PgChannelRepository, PgProfileRepository, PgSessionRepository,
};

/// Per-child channel rows
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn find_by_child(&self, child_id: &ChildId) -> Result<Option<Channel>>;

    async fn find_by_stage_arn(&self, stage_arn: &str) -> Result<Option<Channel>>;

    /// Errors with `NotFound` for an unknown id
    async fn get(&self, id: &ChannelId) -> Result<Channel>;

    async fn insert(&self, channel: &Channel) -> Result<()>;

    async fn set_stage_arn(&self, id: &ChannelId, stage_arn: &str) -> Result<()>;

    async fn set_status(
        &self,
        id: &ChannelId,
        status: ChannelStatus,
        last_live_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Bind the legacy RTMPS ingest (channel ARN, endpoint, encrypted key)
    async fn set_legacy_binding(
        &self,
        id: &ChannelId,
        channel_arn: &str,
        ingest_endpoint: &str,
        stream_key_ciphertext: &str,
    ) -> Result<()>;

    async fn set_stream_key(&self, id: &ChannelId, stream_key_ciphertext: &str) -> Result<()>;
}

/// Stream session rows
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new `IN_PROGRESS` session. Returns `Ok(false)` when another
    /// `IN_PROGRESS` row already exists for the channel (the store enforces
    /// the single-live invariant; racing starts produce one winner).
    async fn insert(&self, session: &StreamSession) -> Result<bool>;

    /// Errors with `NotFound` for an unknown id
    async fn get(&self, id: &SessionId) -> Result<StreamSession>;

    async fn find_in_progress(&self, channel_id: &ChannelId) -> Result<Option<StreamSession>>;

    /// Conditional status transition: the write carries a where-clause on
    /// both id and `from`. Returns `Ok(false)` when the row was not in
    /// `from` (a lost race); the caller reloads and retries once.
    async fn transition(
        &self,
        id: &SessionId,
        from: SessionStatus,
        to: SessionStatus,
        ended_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Completed sessions newest first, strictly after `cursor` when given
    async fn list_completed(
        &self,
        channel_id: &ChannelId,
        limit: u32,
        cursor: Option<&SessionCursor>,
    ) -> Result<Vec<StreamSession>>;
}

/// Append-only audit log
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// Child profiles and parent watch relations (read-only to the core)
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_child(&self, child_id: &ChildId) -> Result<Option<ChildProfile>>;

    async fn can_watch(&self, parent_user_id: &UserId, child_id: &ChildId) -> Result<bool>;
}
