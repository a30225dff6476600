//! Session and channel lifecycle
//!
//! Gates provisioning on ownership, binds each child to a stage, enforces
//! the single-IN_PROGRESS-session-per-channel invariant, and reconciles
//! local session state against the upstream "actively streaming" signal.
//! Conflicting writes to one channel are serialized by the store's
//! conditional inserts/updates rather than an in-process lock, so the
//! manager is safe under horizontal scale-out.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::config::IngressConfig;
use crate::models::{
    Channel, ChildId, ChildProfile, PageInfo, PageRequest, ParticipantGrant, SessionCursor,
    SessionId, SessionStatus, StreamId, StreamSession, UserId,
};
use crate::repository::{
    AuditRepository, ChannelRepository, ProfileRepository, SessionRepository,
};
use crate::service::audit::{AuditAction, AuditResourceType, AuditService};
use crate::service::credentials::CredentialIssuer;
use crate::service::playback_token::PlaybackTokenService;
use crate::service::stream_key::StreamKeyCipher;
use crate::upstream::{CompositionDestination, StageControl};
use crate::{Error, Result};

/// Realtime ingest credentials for the WebRTC path
#[derive(Debug, Clone)]
pub struct RealtimeIngest {
    pub stage_arn: String,
    pub grant: ParticipantGrant,
    pub webrtc_url: String,
}

/// Ingest parameters for the legacy RTMPS path
#[derive(Debug, Clone)]
pub struct RtmpsIngest {
    pub ingest_endpoint: String,
    pub stream_key: String,
}

/// A freshly started session plus its mode-specific credentials
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: StreamSession,
    pub stage_arn: String,
    pub webrtc: Option<RealtimeIngest>,
    pub rtmps: Option<RtmpsIngest>,
}

/// Viewer-facing playback credentials
#[derive(Debug, Clone, Default)]
pub struct PlaybackCredentials {
    pub hls_url: Option<String>,
    pub viewer_token: Option<String>,
    pub viewer_participant_id: Option<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

/// Channel liveness as seen by a viewer
#[derive(Debug, Clone)]
pub struct LivenessStatus {
    pub is_live: bool,
    pub current_session_id: Option<SessionId>,
    pub last_live_at: Option<chrono::DateTime<Utc>>,
    /// Unknown until the upstream exposes participant enumeration
    pub participant_count: u32,
}

/// Full playback response
#[derive(Debug, Clone)]
pub struct PlaybackInfo {
    pub child_id: ChildId,
    pub stage_arn: String,
    pub playback: PlaybackCredentials,
    pub status: LivenessStatus,
}

/// Session/channel lifecycle manager
#[derive(Clone)]
pub struct SessionManager {
    channels: Arc<dyn ChannelRepository>,
    sessions: Arc<dyn SessionRepository>,
    profiles: Arc<dyn ProfileRepository>,
    upstream: Arc<dyn StageControl>,
    issuer: Arc<CredentialIssuer>,
    cipher: Option<StreamKeyCipher>,
    playback_signer: Option<PlaybackTokenService>,
    audit: AuditService,
    ingress: IngressConfig,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ingress", &self.ingress)
            .finish()
    }
}

pub struct SessionManagerDeps {
    pub channels: Arc<dyn ChannelRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub upstream: Arc<dyn StageControl>,
    pub issuer: Arc<CredentialIssuer>,
    pub cipher: Option<StreamKeyCipher>,
    pub playback_signer: Option<PlaybackTokenService>,
    pub ingress: IngressConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(deps: SessionManagerDeps) -> Self {
        Self {
            channels: deps.channels,
            sessions: deps.sessions,
            profiles: deps.profiles,
            upstream: deps.upstream,
            issuer: deps.issuer,
            cipher: deps.cipher,
            playback_signer: deps.playback_signer,
            audit: AuditService::new(deps.audit),
            ingress: deps.ingress,
        }
    }

    /// Caller must own the child and the child must have streaming enabled
    pub async fn authorize_publisher(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<ChildProfile> {
        let profile = self
            .profiles
            .find_child(child_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Child not found: {child_id}")))?;

        if !profile.is_owned_by(caller) {
            return Err(Error::Forbidden(format!(
                "Caller does not own child {child_id}"
            )));
        }
        if !profile.streaming_enabled {
            return Err(Error::Forbidden(format!(
                "Streaming is not enabled for child {child_id}"
            )));
        }
        Ok(profile)
    }

    /// Caller must own the child or hold a `can_watch` grant
    pub async fn authorize_viewer(&self, child_id: &ChildId, caller: &UserId) -> Result<()> {
        let profile = self
            .profiles
            .find_child(child_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Child not found: {child_id}")))?;

        if profile.is_owned_by(caller) || self.profiles.can_watch(caller, child_id).await? {
            return Ok(());
        }
        Err(Error::Forbidden(format!(
            "Caller may not watch child {child_id}"
        )))
    }

    /// Find or create the channel row and its stage binding.
    ///
    /// Resolution order: an existing binding that still exists upstream, the
    /// configured default stage, then a freshly created per-child stage.
    pub async fn ensure_channel_for_child(&self, child_id: &ChildId) -> Result<Channel> {
        let existing = self.channels.find_by_child(child_id).await?;

        if let Some(channel) = &existing {
            if let Some(stage_arn) = &channel.stage_arn {
                if self.upstream.get_stage(stage_arn).await?.is_some() {
                    return Ok(channel.clone());
                }
                warn!(
                    channel_id = %channel.id,
                    stage_arn = %stage_arn,
                    "Bound stage no longer exists upstream, rebinding"
                );
            }
        }

        let stage_arn = self.resolve_stage_for_child(child_id).await?;

        match existing {
            Some(mut channel) => {
                self.channels.set_stage_arn(&channel.id, &stage_arn).await?;
                channel.stage_arn = Some(stage_arn);
                Ok(channel)
            }
            None => {
                let mut channel = Channel::new(child_id.clone());
                channel.stage_arn = Some(stage_arn);
                self.channels.insert(&channel).await?;
                self.audit
                    .record(
                        AuditAction::ChannelCreated,
                        AuditResourceType::Channel,
                        channel.id.to_string(),
                        child_id.to_string(),
                        json!({ "childId": child_id }),
                    )
                    .await;
                Ok(channel)
            }
        }
    }

    async fn resolve_stage_for_child(&self, child_id: &ChildId) -> Result<String> {
        if !self.ingress.default_stage_arn.is_empty()
            && self
                .upstream
                .get_stage(&self.ingress.default_stage_arn)
                .await?
                .is_some()
        {
            return Ok(self.ingress.default_stage_arn.clone());
        }

        let name = format!("child-{}-{}", child_id, Utc::now().timestamp_millis());
        let mut tags = std::collections::HashMap::new();
        tags.insert("childId".to_string(), child_id.to_string());
        tags.insert("environment".to_string(), self.ingress.environment.clone());

        let stage = self.upstream.create_stage(&name, tags).await?;
        info!(stage_arn = %stage.arn, child_id = %child_id, "Created per-child stage");
        self.audit
            .record(
                AuditAction::StageCreated,
                AuditResourceType::Stage,
                stage.arn.clone(),
                child_id.to_string(),
                json!({ "name": name, "childId": child_id }),
            )
            .await;
        Ok(stage.arn)
    }

    /// WebRTC realtime ingest credentials without a session row
    pub async fn provision_ingest(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<RealtimeIngest> {
        self.authorize_publisher(child_id, caller).await?;
        let channel = self.ensure_channel_for_child(child_id).await?;
        let stage_arn = channel
            .stage_arn
            .ok_or_else(|| Error::Internal("Channel has no stage binding".to_string()))?;

        let grant = self
            .issuer
            .publish_token(&stage_arn, caller, child_id, &StreamId::new())
            .await?;

        Ok(RealtimeIngest {
            stage_arn,
            grant,
            webrtc_url: self.issuer.realtime_url(),
        })
    }

    /// Ingest parameters for the legacy RTMPS path. Reads re-encrypt legacy
    /// plaintext keys in place, so writes always produce ciphertext.
    pub async fn provision_rtmps_ingest(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<RtmpsIngest> {
        self.authorize_publisher(child_id, caller).await?;
        let channel = self.ensure_channel_for_child(child_id).await?;
        self.rtmps_ingest_for(&channel).await
    }

    async fn rtmps_ingest_for(&self, channel: &Channel) -> Result<RtmpsIngest> {
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            Error::Internal("Stream key encryption is not configured".to_string())
        })?;
        let ingest_endpoint = channel.legacy_ingest_endpoint.clone().ok_or_else(|| {
            Error::NotFound(format!(
                "No RTMPS ingest configured for channel {}",
                channel.id
            ))
        })?;
        let stored = channel.legacy_stream_key.as_deref().ok_or_else(|| {
            Error::NotFound(format!("No stream key configured for channel {}", channel.id))
        })?;

        let stream_key = cipher.decrypt(stored)?;
        if !StreamKeyCipher::is_ciphertext(stored) {
            // Legacy plaintext row: upgrade it to ciphertext on first read
            let ciphertext = cipher.encrypt(&stream_key)?;
            self.channels.set_stream_key(&channel.id, &ciphertext).await?;
        }

        Ok(RtmpsIngest {
            ingest_endpoint,
            stream_key,
        })
    }

    /// Start a session. Exactly one `IN_PROGRESS` row per channel: a stale
    /// local session (upstream idle) is reconciled first; a genuinely live
    /// one is a conflict.
    pub async fn create_session(
        &self,
        child_id: &ChildId,
        caller: &UserId,
        with_webrtc_token: bool,
    ) -> Result<StartedSession> {
        self.authorize_publisher(child_id, caller).await?;
        let channel = self.ensure_channel_for_child(child_id).await?;
        let stage_arn = channel
            .stage_arn
            .clone()
            .ok_or_else(|| Error::Internal("Channel has no stage binding".to_string()))?;

        if let Some(existing) = self.sessions.find_in_progress(&channel.id).await? {
            if self.stage_is_live(&stage_arn).await {
                return Err(Error::SessionAlreadyActive {
                    channel_id: channel.id.to_string(),
                    session_id: existing.id.to_string(),
                });
            }
            self.reconcile_stale_session(&channel, &existing, caller).await?;
        }

        let webrtc = if with_webrtc_token {
            let grant = self
                .issuer
                .publish_token(&stage_arn, caller, child_id, &StreamId::new())
                .await?;
            Some(RealtimeIngest {
                stage_arn: stage_arn.clone(),
                grant,
                webrtc_url: self.issuer.realtime_url(),
            })
        } else {
            None
        };

        let rtmps = if with_webrtc_token {
            None
        } else {
            Some(self.rtmps_ingest_for(&channel).await?)
        };

        let session = StreamSession::new(channel.id.clone(), child_id.clone());
        if !self.sessions.insert(&session).await? {
            // Lost the start race; the winner's row is authoritative
            let winner = self.sessions.find_in_progress(&channel.id).await?;
            return Err(Error::SessionAlreadyActive {
                channel_id: channel.id.to_string(),
                session_id: winner.map(|s| s.id.to_string()).unwrap_or_default(),
            });
        }

        self.channels
            .set_status(&channel.id, crate::models::ChannelStatus::Live, None)
            .await?;

        self.start_composition_if_configured(&stage_arn, &session.id)
            .await;

        self.audit
            .record(
                AuditAction::SessionStarted,
                AuditResourceType::Session,
                session.id.to_string(),
                caller.to_string(),
                json!({ "channelId": channel.id, "childId": child_id, "stageArn": stage_arn }),
            )
            .await;
        info!(session_id = %session.id, channel_id = %channel.id, "Session started");

        Ok(StartedSession {
            session,
            stage_arn,
            webrtc,
            rtmps,
        })
    }

    /// Persist the session/channel rows for a WHIP start whose stage came
    /// from the pool. The channel is (re)bound to the pooled stage; the
    /// single-IN_PROGRESS invariant applies exactly as in `create_session`.
    pub async fn record_whip_start(
        &self,
        child_id: &ChildId,
        caller: &UserId,
        stage_arn: &str,
    ) -> Result<StreamSession> {
        let channel = match self.channels.find_by_child(child_id).await? {
            Some(channel) => channel,
            None => {
                let channel = Channel::new(child_id.clone());
                self.channels.insert(&channel).await?;
                self.audit
                    .record(
                        AuditAction::ChannelCreated,
                        AuditResourceType::Channel,
                        channel.id.to_string(),
                        child_id.to_string(),
                        json!({ "childId": child_id }),
                    )
                    .await;
                channel
            }
        };

        if let Some(existing) = self.sessions.find_in_progress(&channel.id).await? {
            let prior_stage = channel.stage_arn.as_deref().unwrap_or(stage_arn);
            if self.stage_is_live(prior_stage).await {
                return Err(Error::SessionAlreadyActive {
                    channel_id: channel.id.to_string(),
                    session_id: existing.id.to_string(),
                });
            }
            self.reconcile_stale_session(&channel, &existing, caller).await?;
        }

        self.channels.set_stage_arn(&channel.id, stage_arn).await?;

        let session = StreamSession::new(channel.id.clone(), child_id.clone());
        if !self.sessions.insert(&session).await? {
            let winner = self.sessions.find_in_progress(&channel.id).await?;
            return Err(Error::SessionAlreadyActive {
                channel_id: channel.id.to_string(),
                session_id: winner.map(|s| s.id.to_string()).unwrap_or_default(),
            });
        }

        self.channels
            .set_status(&channel.id, crate::models::ChannelStatus::Live, None)
            .await?;
        self.audit
            .record(
                AuditAction::SessionStarted,
                AuditResourceType::Session,
                session.id.to_string(),
                caller.to_string(),
                json!({ "channelId": channel.id, "childId": child_id, "stageArn": stage_arn, "transport": "whip" }),
            )
            .await;
        info!(session_id = %session.id, stage_arn = %stage_arn, "WHIP session started");

        Ok(session)
    }

    /// Complete the session bound to a pooled stage when its WHIP stream
    /// stops. The caller must own the channel's child.
    pub async fn record_whip_stop(&self, stage_arn: &str, caller: &UserId) -> Result<()> {
        let Some(channel) = self.channels.find_by_stage_arn(stage_arn).await? else {
            // Stage was never persisted against a channel; nothing to close
            return Ok(());
        };

        let profile = self
            .profiles
            .find_child(&channel.child_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Child not found: {}", channel.child_id)))?;
        if !profile.is_owned_by(caller) {
            return Err(Error::Forbidden(format!(
                "Caller does not own child {}",
                channel.child_id
            )));
        }

        if let Some(session) = self.sessions.find_in_progress(&channel.id).await? {
            self.transition_with_retry(
                &session.id,
                SessionStatus::InProgress,
                SessionStatus::Completed,
                None,
            )
            .await?;
            self.audit
                .record(
                    AuditAction::SessionEnded,
                    AuditResourceType::Session,
                    session.id.to_string(),
                    caller.to_string(),
                    json!({ "channelId": channel.id, "transport": "whip" }),
                )
                .await;
        }
        self.channels
            .set_status(
                &channel.id,
                crate::models::ChannelStatus::Inactive,
                Some(Utc::now()),
            )
            .await?;
        Ok(())
    }

    /// Upstream liveness; errors are treated as "not live" so a degraded
    /// upstream cannot wedge session starts
    async fn stage_is_live(&self, stage_arn: &str) -> bool {
        match self.upstream.get_stage(stage_arn).await {
            Ok(Some(stage)) => stage.active_session_id.is_some(),
            Ok(None) => false,
            Err(e) => {
                warn!(stage_arn = %stage_arn, "GetStage failed during liveness check, assuming idle: {e}");
                false
            }
        }
    }

    async fn reconcile_stale_session(
        &self,
        channel: &Channel,
        stale: &StreamSession,
        caller: &UserId,
    ) -> Result<()> {
        let completed = self
            .transition_with_retry(&stale.id, SessionStatus::InProgress, SessionStatus::Completed, None)
            .await?;
        if completed {
            self.channels
                .set_status(
                    &channel.id,
                    crate::models::ChannelStatus::Inactive,
                    Some(Utc::now()),
                )
                .await?;
            self.audit
                .record(
                    AuditAction::SessionForceEndedReconcile,
                    AuditResourceType::Session,
                    stale.id.to_string(),
                    caller.to_string(),
                    json!({ "channelId": channel.id, "reason": "upstream reports no active session" }),
                )
                .await;
            info!(session_id = %stale.id, "Reconciled stale session to COMPLETED");
        }
        Ok(())
    }

    /// Conditional transition with one reload-and-retry on a lost race.
    /// Returns whether this caller performed the transition.
    async fn transition_with_retry(
        &self,
        id: &SessionId,
        from: SessionStatus,
        to: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let ended_at = Some(Utc::now());
        if self
            .sessions
            .transition(id, from, to, ended_at, error_message)
            .await?
        {
            return Ok(true);
        }

        // Lost the race: reload and retry once against the observed state
        let current = self.sessions.get(id).await?;
        if current.status == to || current.status.is_terminal() {
            return Ok(false);
        }
        self.sessions
            .transition(id, current.status, to, ended_at, error_message)
            .await
    }

    pub async fn end_session(
        &self,
        session_id: &SessionId,
        caller: &UserId,
    ) -> Result<StreamSession> {
        let session = self.sessions.get(session_id).await?;
        let channel = self.channels.get(&session.channel_id).await?;

        let profile = self
            .profiles
            .find_child(&session.child_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Child not found: {}", session.child_id)))?;
        if !profile.is_owned_by(caller) {
            return Err(Error::Forbidden(format!(
                "Caller does not own session {session_id}"
            )));
        }

        if let Some(stage_arn) = &channel.stage_arn {
            self.stop_active_compositions(stage_arn).await;
        }

        self.transition_with_retry(
            session_id,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            None,
        )
        .await?;

        self.channels
            .set_status(
                &channel.id,
                crate::models::ChannelStatus::Inactive,
                Some(Utc::now()),
            )
            .await?;

        self.audit
            .record(
                AuditAction::SessionEnded,
                AuditResourceType::Session,
                session_id.to_string(),
                caller.to_string(),
                json!({ "channelId": channel.id }),
            )
            .await;
        info!(session_id = %session_id, "Session ended");

        self.sessions.get(session_id).await
    }

    /// Admin kill switch: the session is marked `FAILED`, not `COMPLETED`
    pub async fn force_stop_session(
        &self,
        session_id: &SessionId,
        admin: &UserId,
        reason: &str,
    ) -> Result<StreamSession> {
        let session = self.sessions.get(session_id).await?;
        let channel = self.channels.get(&session.channel_id).await?;

        if let Some(stage_arn) = &channel.stage_arn {
            self.stop_active_compositions(stage_arn).await;
        }

        self.transition_with_retry(
            session_id,
            SessionStatus::InProgress,
            SessionStatus::Failed,
            Some(reason),
        )
        .await?;

        self.channels
            .set_status(
                &channel.id,
                crate::models::ChannelStatus::Inactive,
                Some(Utc::now()),
            )
            .await?;

        self.audit
            .record(
                AuditAction::StreamForceStopped,
                AuditResourceType::Stream,
                session_id.to_string(),
                admin.to_string(),
                json!({ "channelId": channel.id, "reason": reason }),
            )
            .await;
        warn!(session_id = %session_id, "Session force-stopped: {reason}");

        self.sessions.get(session_id).await
    }

    /// Composition start failure never fails the session start
    async fn start_composition_if_configured(&self, stage_arn: &str, session_id: &SessionId) {
        let mut destinations = Vec::new();
        if !self.ingress.channel_arn.is_empty() {
            destinations.push(CompositionDestination::Channel {
                channel_arn: self.ingress.channel_arn.clone(),
            });
        }
        if !self.ingress.storage_arn.is_empty() {
            destinations.push(CompositionDestination::Storage {
                storage_arn: self.ingress.storage_arn.clone(),
            });
        }
        if destinations.is_empty() {
            return;
        }

        // session_id doubles as the upstream idempotency token so a retried
        // start cannot spawn a second composition
        match self
            .upstream
            .start_composition(stage_arn, session_id.as_str(), destinations)
            .await
        {
            Ok(arn) => info!(composition_arn = %arn, session_id = %session_id, "Composition started"),
            Err(e) => warn!(session_id = %session_id, "Composition start failed (non-fatal): {e}"),
        }
    }

    async fn stop_active_compositions(&self, stage_arn: &str) {
        let compositions = match self.upstream.list_compositions(stage_arn).await {
            Ok(compositions) => compositions,
            Err(e) => {
                warn!(stage_arn = %stage_arn, "ListCompositions failed (non-fatal): {e}");
                return;
            }
        };
        for composition in compositions.into_iter().filter(|c| c.active) {
            if let Err(e) = self.upstream.stop_composition(&composition.arn).await {
                warn!(composition_arn = %composition.arn, "Composition stop failed (non-fatal): {e}");
            }
        }
    }

    /// Playback credentials plus liveness for a parent viewer
    pub async fn get_playback(
        &self,
        child_id: &ChildId,
        caller: &UserId,
        want_hls: bool,
    ) -> Result<PlaybackInfo> {
        self.authorize_viewer(child_id, caller).await?;
        let channel = self.ensure_channel_for_child(child_id).await?;
        let stage_arn = channel
            .stage_arn
            .clone()
            .ok_or_else(|| Error::Internal("Channel has no stage binding".to_string()))?;

        let is_live = self.stage_is_live(&stage_arn).await;
        let current_session = self.sessions.find_in_progress(&channel.id).await?;

        let mut playback = PlaybackCredentials::default();

        if want_hls {
            if let (Some(signer), false) =
                (self.playback_signer.as_ref(), self.ingress.channel_arn.is_empty())
            {
                let hls_active = self
                    .upstream
                    .list_compositions(&stage_arn)
                    .await
                    .map(|cs| cs.iter().any(|c| c.active))
                    .unwrap_or(false);
                if hls_active {
                    let ttl = chrono::Duration::hours(12);
                    let token = signer.sign_viewer_token(
                        &self.ingress.channel_arn,
                        caller.as_str(),
                        ttl,
                    )?;
                    playback.hls_url =
                        derive_hls_url(&self.ingress.channel_arn).map(|url| format!("{url}?token={token}"));
                    playback.viewer_token = Some(token);
                    playback.expires_at = Some(Utc::now() + ttl);
                }
            }
        } else {
            let grant = self
                .issuer
                .subscribe_token(&stage_arn, caller, Some(child_id), None)
                .await?;
            playback.expires_at = Some(grant.expires_at);
            playback.viewer_participant_id = Some(grant.participant_id);
            playback.viewer_token = Some(grant.token);
        }

        Ok(PlaybackInfo {
            child_id: child_id.clone(),
            stage_arn,
            playback,
            status: LivenessStatus {
                is_live,
                current_session_id: current_session.map(|s| s.id),
                last_live_at: channel.last_live_at,
                participant_count: 0,
            },
        })
    }

    /// Completed sessions for a child, newest first
    pub async fn list_vods(
        &self,
        child_id: &ChildId,
        caller: &UserId,
        page: PageRequest,
    ) -> Result<(Vec<StreamSession>, PageInfo)> {
        self.authorize_viewer(child_id, caller).await?;

        let Some(channel) = self.channels.find_by_child(child_id).await? else {
            return Ok((
                Vec::new(),
                PageInfo {
                    next_cursor: None,
                    has_more: false,
                },
            ));
        };

        let cursor = page
            .cursor
            .as_deref()
            .map(crate::models::decode_cursor)
            .transpose()?;
        // Fetch one extra row to learn whether another page exists
        let mut sessions = self
            .sessions
            .list_completed(&channel.id, page.limit + 1, cursor.as_ref())
            .await?;

        let has_more = sessions.len() > page.limit as usize;
        sessions.truncate(page.limit as usize);
        let next_cursor = if has_more {
            sessions.last().map(|s| {
                crate::models::encode_cursor(&SessionCursor {
                    started_at: s.started_at,
                    session_id: s.id.clone(),
                })
            })
        } else {
            None
        };

        Ok((
            sessions,
            PageInfo {
                next_cursor,
                has_more,
            },
        ))
    }

    /// Rotate the legacy RTMPS stream key. The fresh key is returned once
    /// and stored only as ciphertext.
    pub async fn reset_stream_key(&self, child_id: &ChildId, caller: &UserId) -> Result<String> {
        self.authorize_publisher(child_id, caller).await?;
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            Error::Internal("Stream key encryption is not configured".to_string())
        })?;
        let channel = self
            .channels
            .find_by_child(child_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No channel for child {child_id}")))?;

        let stream_key = generate_stream_key(self.issuer.region());
        let ciphertext = cipher.encrypt(&stream_key)?;
        self.channels.set_stream_key(&channel.id, &ciphertext).await?;

        self.audit
            .record(
                AuditAction::ChannelKeyReset,
                AuditResourceType::Channel,
                channel.id.to_string(),
                caller.to_string(),
                json!({ "childId": child_id }),
            )
            .await;
        info!(channel_id = %channel.id, "Stream key reset");

        Ok(stream_key)
    }
}

/// `arn:aws:ivs:{region}:{account}:channel/{id}` → global playback URL
fn derive_hls_url(channel_arn: &str) -> Option<String> {
    let mut parts = channel_arn.splitn(6, ':');
    let (_arn, _aws, _ivs, region, account, resource) = (
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
        parts.next()?,
    );
    let channel_id = resource.strip_prefix("channel/")?;
    Some(format!(
        "https://playback.live-video.net/api/video/v1/{region}.{account}.channel.{channel_id}.m3u8"
    ))
}

/// Fresh opaque stream key, region-scoped like the upstream's own keys
fn generate_stream_key(region: &str) -> String {
    use rand::{distr::Alphanumeric, Rng, RngExt};
    let secret: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("sk_{region}_{secret}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_hls_url() {
        let url =
            derive_hls_url("arn:aws:ivs:us-east-1:123456789012:channel/abcdEFGH").unwrap();
        assert_eq!(
            url,
            "https://playback.live-video.net/api/video/v1/us-east-1.123456789012.channel.abcdEFGH.m3u8"
        );
    }

    #[test]
    fn test_derive_hls_url_rejects_malformed_arn() {
        assert!(derive_hls_url("not-an-arn").is_none());
        assert!(derive_hls_url("arn:aws:ivs:us-east-1:123:stage/abc").is_none());
    }

    #[test]
    fn test_generated_stream_key_shape() {
        let key = generate_stream_key("us-east-1");
        assert!(key.starts_with("sk_us-east-1_"));
        assert_eq!(key.len(), "sk_us-east-1_".len() + 24);
    }
}
