//! Postgres implementations of the row stores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::models::{
    Channel, ChannelId, ChannelStatus, ChildId, ChildProfile, SessionCursor, SessionId,
    SessionStatus, StreamSession, UserId,
};
use crate::service::audit::AuditEntry;
use crate::{Error, Result};

use super::{AuditRepository, ChannelRepository, ProfileRepository, SessionRepository};

const CHANNEL_COLUMNS: &str = "id, child_id, stage_arn, legacy_channel_arn, \
     legacy_ingest_endpoint, legacy_stream_key, status, last_live_at, created_at, updated_at";

const SESSION_COLUMNS: &str =
    "id, channel_id, child_id, status, started_at, ended_at, error_message";

fn row_to_channel(row: &PgRow) -> Result<Channel> {
    Ok(Channel {
        id: row.try_get("id")?,
        child_id: row.try_get("child_id")?,
        stage_arn: row.try_get("stage_arn")?,
        legacy_channel_arn: row.try_get("legacy_channel_arn")?,
        legacy_ingest_endpoint: row.try_get("legacy_ingest_endpoint")?,
        legacy_stream_key: row.try_get("legacy_stream_key")?,
        status: ChannelStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
        last_live_at: row.try_get("last_live_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_session(row: &PgRow) -> Result<StreamSession> {
    Ok(StreamSession {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        child_id: row.try_get("child_id")?,
        status: SessionStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Channel rows in the `channels` table
#[derive(Clone)]
pub struct PgChannelRepository {
    pool: PgPool,
}

impl PgChannelRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PgChannelRepository {
    async fn find_by_child(&self, child_id: &ChildId) -> Result<Option<Channel>> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE child_id = $1"
        ))
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_channel).transpose()
    }

    async fn find_by_stage_arn(&self, stage_arn: &str) -> Result<Option<Channel>> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE stage_arn = $1"
        ))
        .bind(stage_arn)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_channel).transpose()
    }

    async fn get(&self, id: &ChannelId) -> Result<Channel> {
        let row = sqlx::query(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Channel not found: {id}")))?;

        row_to_channel(&row)
    }

    async fn insert(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            "INSERT INTO channels (id, child_id, stage_arn, legacy_channel_arn, \
             legacy_ingest_endpoint, legacy_stream_key, status, last_live_at, \
             created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&channel.id)
        .bind(&channel.child_id)
        .bind(&channel.stage_arn)
        .bind(&channel.legacy_channel_arn)
        .bind(&channel.legacy_ingest_endpoint)
        .bind(&channel.legacy_stream_key)
        .bind(channel.status.as_str())
        .bind(channel.last_live_at)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_stage_arn(&self, id: &ChannelId, stage_arn: &str) -> Result<()> {
        sqlx::query("UPDATE channels SET stage_arn = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(stage_arn)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: &ChannelId,
        status: ChannelStatus,
        last_live_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET status = $2, \
             last_live_at = COALESCE($3, last_live_at), updated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_live_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_legacy_binding(
        &self,
        id: &ChannelId,
        channel_arn: &str,
        ingest_endpoint: &str,
        stream_key_ciphertext: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channels SET legacy_channel_arn = $2, legacy_ingest_endpoint = $3, \
             legacy_stream_key = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(id)
        .bind(channel_arn)
        .bind(ingest_endpoint)
        .bind(stream_key_ciphertext)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_stream_key(&self, id: &ChannelId, stream_key_ciphertext: &str) -> Result<()> {
        sqlx::query("UPDATE channels SET legacy_stream_key = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(stream_key_ciphertext)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Session rows in the `stream_sessions` table
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: &StreamSession) -> Result<bool> {
        // Relies on the partial unique index on (channel_id) WHERE
        // status = 'IN_PROGRESS'; a racing start loses the conflict and
        // observes rows_affected = 0.
        let result = sqlx::query(
            "INSERT INTO stream_sessions (id, channel_id, child_id, status, started_at, \
             ended_at, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (channel_id) WHERE status = 'IN_PROGRESS' DO NOTHING",
        )
        .bind(&session.id)
        .bind(&session.channel_id)
        .bind(&session.child_id)
        .bind(session.status.as_str())
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(&session.error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &SessionId) -> Result<StreamSession> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM stream_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Session not found: {id}")))?;

        row_to_session(&row)
    }

    async fn find_in_progress(&self, channel_id: &ChannelId) -> Result<Option<StreamSession>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM stream_sessions \
             WHERE channel_id = $1 AND status = 'IN_PROGRESS' \
             ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn transition(
        &self,
        id: &SessionId,
        from: SessionStatus,
        to: SessionStatus,
        ended_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE stream_sessions SET status = $3, ended_at = $4, error_message = $5 \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(ended_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_completed(
        &self,
        channel_id: &ChannelId,
        limit: u32,
        cursor: Option<&SessionCursor>,
    ) -> Result<Vec<StreamSession>> {
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query(&format!(
                    "SELECT {SESSION_COLUMNS} FROM stream_sessions \
                     WHERE channel_id = $1 AND status = 'COMPLETED' \
                       AND (started_at, id) < ($2, $3) \
                     ORDER BY started_at DESC, id DESC LIMIT $4"
                ))
                .bind(channel_id)
                .bind(cursor.started_at)
                .bind(&cursor.session_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SESSION_COLUMNS} FROM stream_sessions \
                     WHERE channel_id = $1 AND status = 'COMPLETED' \
                     ORDER BY started_at DESC, id DESC LIMIT $2"
                ))
                .bind(channel_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_session).collect()
    }
}

/// Append-only rows in the `audit_log` table
#[derive(Clone)]
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (action, resource_type, resource_id, user_id, details, \
             timestamp)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(&entry.resource_id)
        .bind(&entry.user_id)
        .bind(&entry.details)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Child profiles and watch relations, owned by the account service schema
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: PgPool,
}

impl PgProfileRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn find_child(&self, child_id: &ChildId) -> Result<Option<ChildProfile>> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, streaming_enabled FROM child_profiles WHERE id = $1",
        )
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(ChildProfile {
                id: row.try_get("id")?,
                owner_user_id: row.try_get("owner_user_id")?,
                streaming_enabled: row.try_get("streaming_enabled")?,
            }),
            None => None,
        })
    }

    async fn can_watch(&self, parent_user_id: &UserId, child_id: &ChildId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT can_watch FROM watch_grants WHERE parent_user_id = $1 AND child_id = $2",
        )
        .bind(parent_user_id)
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("can_watch")?),
            None => Ok(false),
        }
    }
}
