//! In-memory row stores for tests and local development
//!
//! Semantics mirror the Postgres implementations, including the conditional
//! session transition: the status check and the write happen under one lock,
//! which is the in-process equivalent of the row-conditional UPDATE.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{
    Channel, ChannelId, ChannelStatus, ChildId, ChildProfile, SessionCursor, SessionId,
    SessionStatus, StreamSession, UserId,
};
use crate::service::audit::AuditEntry;
use crate::{Error, Result};

use super::{AuditRepository, ChannelRepository, ProfileRepository, SessionRepository};

#[derive(Debug, Clone, Default)]
pub struct InMemoryChannelRepository {
    channels: Arc<Mutex<HashMap<ChannelId, Channel>>>,
}

impl InMemoryChannelRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn find_by_child(&self, child_id: &ChildId) -> Result<Option<Channel>> {
        let channels = self.channels.lock().await;
        Ok(channels.values().find(|c| &c.child_id == child_id).cloned())
    }

    async fn find_by_stage_arn(&self, stage_arn: &str) -> Result<Option<Channel>> {
        let channels = self.channels.lock().await;
        Ok(channels
            .values()
            .find(|c| c.stage_arn.as_deref() == Some(stage_arn))
            .cloned())
    }

    async fn get(&self, id: &ChannelId) -> Result<Channel> {
        let channels = self.channels.lock().await;
        channels
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Channel not found: {id}")))
    }

    async fn insert(&self, channel: &Channel) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if channels.values().any(|c| c.child_id == channel.child_id) {
            return Err(Error::InvalidInput("Resource already exists".to_string()));
        }
        channels.insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    async fn set_stage_arn(&self, id: &ChannelId, stage_arn: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Channel not found: {id}")))?;
        channel.stage_arn = Some(stage_arn.to_string());
        channel.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(
        &self,
        id: &ChannelId,
        status: ChannelStatus,
        last_live_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Channel not found: {id}")))?;
        channel.status = status;
        if last_live_at.is_some() {
            channel.last_live_at = last_live_at;
        }
        channel.updated_at = Utc::now();
        Ok(())
    }

    async fn set_legacy_binding(
        &self,
        id: &ChannelId,
        channel_arn: &str,
        ingest_endpoint: &str,
        stream_key_ciphertext: &str,
    ) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Channel not found: {id}")))?;
        channel.legacy_channel_arn = Some(channel_arn.to_string());
        channel.legacy_ingest_endpoint = Some(ingest_endpoint.to_string());
        channel.legacy_stream_key = Some(stream_key_ciphertext.to_string());
        channel.updated_at = Utc::now();
        Ok(())
    }

    async fn set_stream_key(&self, id: &ChannelId, stream_key_ciphertext: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Channel not found: {id}")))?;
        channel.legacy_stream_key = Some(stream_key_ciphertext.to_string());
        channel.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<Mutex<HashMap<SessionId, StreamSession>>>,
}

impl InMemorySessionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for test assertions
    pub async fn all(&self) -> Vec<StreamSession> {
        self.sessions.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &StreamSession) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        if session.is_in_progress()
            && sessions
                .values()
                .any(|s| s.channel_id == session.channel_id && s.is_in_progress())
        {
            return Ok(false);
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(true)
    }

    async fn get(&self, id: &SessionId) -> Result<StreamSession> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Session not found: {id}")))
    }

    async fn find_in_progress(&self, channel_id: &ChannelId) -> Result<Option<StreamSession>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .filter(|s| &s.channel_id == channel_id && s.is_in_progress())
            .max_by_key(|s| s.started_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: &SessionId,
        from: SessionStatus,
        to: SessionStatus,
        ended_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) if session.status == from => {
                session.status = to;
                session.ended_at = ended_at;
                session.error_message = error_message.map(String::from);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn list_completed(
        &self,
        channel_id: &ChannelId,
        limit: u32,
        cursor: Option<&SessionCursor>,
    ) -> Result<Vec<StreamSession>> {
        let sessions = self.sessions.lock().await;
        let mut completed: Vec<StreamSession> = sessions
            .values()
            .filter(|s| &s.channel_id == channel_id && s.status == SessionStatus::Completed)
            .filter(|s| match cursor {
                Some(cursor) => {
                    (s.started_at, s.id.as_str())
                        < (cursor.started_at, cursor.session_id.as_str())
                }
                None => true,
            })
            .cloned()
            .collect();
        completed.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.as_str().cmp(a.id.as_str()))
        });
        completed.truncate(limit as usize);
        Ok(completed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditRepository {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileRepository {
    children: Arc<Mutex<HashMap<ChildId, ChildProfile>>>,
    watch_grants: Arc<Mutex<HashMap<(UserId, ChildId), bool>>>,
}

impl InMemoryProfileRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_child(&self, profile: ChildProfile) {
        self.children.lock().await.insert(profile.id.clone(), profile);
    }

    pub async fn grant_watch(&self, parent_user_id: UserId, child_id: ChildId, can_watch: bool) {
        self.watch_grants
            .lock()
            .await
            .insert((parent_user_id, child_id), can_watch);
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn find_child(&self, child_id: &ChildId) -> Result<Option<ChildProfile>> {
        Ok(self.children.lock().await.get(child_id).cloned())
    }

    async fn can_watch(&self, parent_user_id: &UserId, child_id: &ChildId) -> Result<bool> {
        Ok(self
            .watch_grants
            .lock()
            .await
            .get(&(parent_user_id.clone(), child_id.clone()))
            .copied()
            .unwrap_or(false))
    }
}
