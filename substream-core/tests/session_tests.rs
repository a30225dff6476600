//! Session lifecycle scenarios: duplicate-live conflicts, stale-session
//! reconciliation, racing starts, force-stop, playback authorization, VOD
//! pagination, and the legacy RTMPS key path.

use std::sync::Arc;

use substream_core::config::IngressConfig;
use substream_core::models::{
    ChannelStatus, ChildId, ChildProfile, PageRequest, SessionStatus, UserId,
};
use substream_core::repository::{
    ChannelRepository, InMemoryAuditRepository, InMemoryChannelRepository,
    InMemoryProfileRepository, InMemorySessionRepository, SessionRepository,
};
use substream_core::service::{
    AuditAction, CredentialIssuer, PlaybackMode, ProvisionMode, Provisioner, SessionManager,
    SessionManagerDeps, StreamKeyCipher,
};
use substream_core::upstream::{InMemoryStageControl, StageControl};
use substream_core::Error;

struct TestEnv {
    manager: Arc<SessionManager>,
    provisioner: Provisioner,
    upstream: InMemoryStageControl,
    channels: Arc<InMemoryChannelRepository>,
    sessions: Arc<InMemorySessionRepository>,
    audit: Arc<InMemoryAuditRepository>,
    profiles: Arc<InMemoryProfileRepository>,
}

async fn build_env(ingress: IngressConfig) -> TestEnv {
    let upstream = InMemoryStageControl::new();
    let shared: Arc<dyn StageControl> = Arc::new(upstream.clone());
    let issuer = Arc::new(CredentialIssuer::new(
        Arc::clone(&shared),
        "us-east-1".to_string(),
        "https://global.whip.live-video.net".to_string(),
    ));

    let channels = Arc::new(InMemoryChannelRepository::new());
    let sessions = Arc::new(InMemorySessionRepository::new());
    let audit = Arc::new(InMemoryAuditRepository::new());
    let profiles = Arc::new(InMemoryProfileRepository::new());

    // Child C1 owned by U1, streaming enabled
    profiles
        .add_child(ChildProfile {
            id: ChildId::from("C1"),
            owner_user_id: UserId::from("U1"),
            streaming_enabled: true,
        })
        .await;

    let manager = Arc::new(SessionManager::new(SessionManagerDeps {
        channels: Arc::clone(&channels) as Arc<dyn ChannelRepository>,
        sessions: Arc::clone(&sessions) as _,
        profiles: Arc::clone(&profiles) as _,
        audit: Arc::clone(&audit) as _,
        upstream: shared,
        issuer,
        cipher: Some(StreamKeyCipher::from_hex_key(&"ab".repeat(32)).unwrap()),
        playback_signer: None,
        ingress,
    }));

    TestEnv {
        provisioner: Provisioner::new(Arc::clone(&manager)),
        manager,
        upstream,
        channels,
        sessions,
        audit,
        profiles,
    }
}

fn child() -> ChildId {
    ChildId::from("C1")
}

fn owner() -> UserId {
    UserId::from("U1")
}

#[tokio::test]
async fn duplicate_live_session_is_blocked() {
    let env = build_env(IngressConfig::default()).await;

    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    // Publisher connected upstream
    env.upstream
        .set_active_session(&started.stage_arn, Some("X"));

    let err = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionAlreadyActive { .. }));

    // Session A unchanged
    let reloaded = env.sessions.get(&started.session.id).await.unwrap();
    assert_eq!(reloaded.status, SessionStatus::InProgress);
    assert!(reloaded.ended_at.is_none());
}

#[tokio::test]
async fn stale_session_is_reconciled_and_new_start_succeeds() {
    let env = build_env(IngressConfig::default()).await;

    let first = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    // Upstream reports the stage idle: the local row is stale

    let second = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    assert_ne!(second.session.id, first.session.id);

    let stale = env.sessions.get(&first.session.id).await.unwrap();
    assert_eq!(stale.status, SessionStatus::Completed);
    assert!(stale.ended_at.is_some());

    let fresh = env.sessions.get(&second.session.id).await.unwrap();
    assert_eq!(fresh.status, SessionStatus::InProgress);

    let actions: Vec<AuditAction> = env
        .audit
        .entries()
        .await
        .iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::SessionForceEndedReconcile));
}

#[tokio::test]
async fn racing_starts_produce_one_in_progress_session() {
    let env = build_env(IngressConfig::default()).await;

    // Materialize the channel first so the race is purely over the session
    let warmup = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    env.manager
        .end_session(&warmup.session.id, &owner())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = Arc::clone(&env.manager);
        handles.push(tokio::spawn(async move {
            manager.create_session(&child(), &owner(), true).await
        }));
    }
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::SessionAlreadyActive { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(winners + conflicts, 4);

    let in_progress = env
        .sessions
        .all()
        .await
        .into_iter()
        .filter(|s| s.status == SessionStatus::InProgress)
        .count();
    assert_eq!(in_progress, 1);
}

#[tokio::test]
async fn end_session_completes_row_and_deactivates_channel() {
    let env = build_env(IngressConfig::default()).await;

    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();

    let channel = env.channels.find_by_child(&child()).await.unwrap().unwrap();
    assert_eq!(channel.status, ChannelStatus::Live);

    let ended = env
        .manager
        .end_session(&started.session.id, &owner())
        .await
        .unwrap();
    assert_eq!(ended.status, SessionStatus::Completed);
    assert!(ended.ended_at.is_some());

    let channel = env.channels.find_by_child(&child()).await.unwrap().unwrap();
    assert_eq!(channel.status, ChannelStatus::Inactive);
    assert!(channel.last_live_at.is_some());
}

#[tokio::test]
async fn end_session_by_non_owner_is_forbidden() {
    let env = build_env(IngressConfig::default()).await;
    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();

    let err = env
        .manager
        .end_session(&started.session.id, &UserId::from("stranger"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn force_stop_marks_session_failed() {
    let env = build_env(IngressConfig::default()).await;
    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();

    let stopped = env
        .manager
        .force_stop_session(&started.session.id, &UserId::from("admin"), "policy violation")
        .await
        .unwrap();
    assert_eq!(stopped.status, SessionStatus::Failed);
    assert_eq!(stopped.error_message.as_deref(), Some("policy violation"));

    let actions: Vec<AuditAction> = env
        .audit
        .entries()
        .await
        .iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::StreamForceStopped));
}

#[tokio::test]
async fn provisioning_requires_ownership_and_enabled_streaming() {
    let env = build_env(IngressConfig::default()).await;

    let err = env
        .manager
        .create_session(&child(), &UserId::from("stranger"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let err = env
        .manager
        .create_session(&ChildId::from("nope"), &owner(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    env.profiles
        .add_child(ChildProfile {
            id: ChildId::from("C2"),
            owner_user_id: owner(),
            streaming_enabled: false,
        })
        .await;
    let err = env
        .manager
        .create_session(&ChildId::from("C2"), &owner(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn playback_requires_watch_grant() {
    let env = build_env(IngressConfig::default()).await;
    let parent = UserId::from("P2");

    let err = env
        .manager
        .get_playback(&child(), &parent, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    env.profiles.grant_watch(parent.clone(), child(), true).await;
    let playback = env.manager.get_playback(&child(), &parent, false).await.unwrap();
    assert!(playback.playback.viewer_token.is_some());
    assert!(!playback.status.is_live);
    assert_eq!(playback.status.participant_count, 0);

    // Viewer tokens carry the 12-hour TTL
    let expires = playback.playback.expires_at.unwrap();
    let ttl = expires - chrono::Utc::now();
    assert!(ttl > chrono::Duration::hours(11));
    assert!(ttl <= chrono::Duration::hours(12));
}

#[tokio::test]
async fn playback_reports_live_session() {
    let env = build_env(IngressConfig::default()).await;

    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    env.upstream
        .set_active_session(&started.stage_arn, Some("upstream-x"));

    let playback = env.manager.get_playback(&child(), &owner(), false).await.unwrap();
    assert!(playback.status.is_live);
    assert_eq!(
        playback.status.current_session_id.as_ref(),
        Some(&started.session.id)
    );
    assert_eq!(playback.stage_arn, started.stage_arn);
}

#[tokio::test]
async fn channel_binds_to_default_stage_when_configured() {
    let env = build_env(IngressConfig::default()).await;
    let default_arn = env.upstream.seed_stage("shared-default", None);

    // Second manager over the same upstream/profile state, now carrying the
    // default stage binding
    let manager = {
        let shared: Arc<dyn StageControl> = Arc::new(env.upstream.clone());
        let issuer = Arc::new(CredentialIssuer::new(
            Arc::clone(&shared),
            "us-east-1".to_string(),
            "https://global.whip.live-video.net".to_string(),
        ));
        let ingress = IngressConfig {
            default_stage_arn: default_arn.clone(),
            ..IngressConfig::default()
        };
        Arc::new(SessionManager::new(SessionManagerDeps {
            channels: Arc::new(InMemoryChannelRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
            profiles: Arc::clone(&env.profiles) as _,
            audit: Arc::new(InMemoryAuditRepository::new()),
            upstream: shared,
            issuer,
            cipher: None,
            playback_signer: None,
            ingress,
        }))
    };

    let channel = manager.ensure_channel_for_child(&child()).await.unwrap();
    assert_eq!(channel.stage_arn.as_deref(), Some(default_arn.as_str()));
    // No per-child stage was created
    assert_eq!(env.upstream.created_count(), 0);
}

#[tokio::test]
async fn per_child_stage_created_and_audited_when_no_default() {
    let env = build_env(IngressConfig::default()).await;

    let channel = env.manager.ensure_channel_for_child(&child()).await.unwrap();
    let stage_arn = channel.stage_arn.unwrap();
    assert!(env.upstream.stage_exists(&stage_arn));

    let entries = env.audit.entries().await;
    let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::StageCreated));
    assert!(actions.contains(&AuditAction::ChannelCreated));

    // Idempotent: a second call returns the same binding, no new stage
    let again = env.manager.ensure_channel_for_child(&child()).await.unwrap();
    assert_eq!(again.stage_arn.as_deref(), Some(stage_arn.as_str()));
}

#[tokio::test]
async fn compositions_start_with_session_and_stop_on_end() {
    let mut ingress = IngressConfig::default();
    ingress.channel_arn = "arn:aws:ivs:us-east-1:123456789012:channel/abc".to_string();
    let env = build_env(ingress).await;

    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();

    let compositions = env
        .upstream
        .list_compositions(&started.stage_arn)
        .await
        .unwrap();
    assert_eq!(compositions.len(), 1);
    assert!(compositions[0].active);
    // The session id is the idempotency token
    assert!(compositions[0].arn.ends_with(started.session.id.as_str()));

    env.manager
        .end_session(&started.session.id, &owner())
        .await
        .unwrap();
    let compositions = env
        .upstream
        .list_compositions(&started.stage_arn)
        .await
        .unwrap();
    assert!(compositions.iter().all(|c| !c.active));
}

#[tokio::test]
async fn vod_listing_paginates_newest_first() {
    let env = build_env(IngressConfig::default()).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let started = env
            .manager
            .create_session(&child(), &owner(), true)
            .await
            .unwrap();
        env.manager
            .end_session(&started.session.id, &owner())
            .await
            .unwrap();
        ids.push(started.session.id);
    }

    let (page1, info1) = env
        .manager
        .list_vods(&child(), &owner(), PageRequest::new(Some(2), None))
        .await
        .unwrap();
    assert_eq!(page1.len(), 2);
    assert!(info1.has_more);
    // Newest first
    assert_eq!(page1[0].id, ids[2]);
    assert_eq!(page1[1].id, ids[1]);

    let (page2, info2) = env
        .manager
        .list_vods(
            &child(),
            &owner(),
            PageRequest::new(Some(2), info1.next_cursor),
        )
        .await
        .unwrap();
    assert_eq!(page2.len(), 1);
    assert_eq!(page2[0].id, ids[0]);
    assert!(!info2.has_more);
    assert!(info2.next_cursor.is_none());
}

#[tokio::test]
async fn rtmps_ingest_upgrades_plaintext_key_and_round_trips() {
    let env = build_env(IngressConfig::default()).await;

    // Materialize the channel, then bind a legacy RTMPS ingest with a
    // plaintext stream key (pre-encryption row)
    let channel = env.manager.ensure_channel_for_child(&child()).await.unwrap();
    env.channels
        .set_legacy_binding(
            &channel.id,
            "arn:aws:ivs:us-east-1:123456789012:channel/legacy",
            "rtmps://ingest.example.net:443/app",
            "legacy-plaintext-key",
        )
        .await
        .unwrap();

    let ingest = env
        .manager
        .provision_rtmps_ingest(&child(), &owner())
        .await
        .unwrap();
    assert_eq!(ingest.ingest_endpoint, "rtmps://ingest.example.net:443/app");
    assert_eq!(ingest.stream_key, "legacy-plaintext-key");

    // The stored value was upgraded to ciphertext on read
    let stored = env
        .channels
        .get(&channel.id)
        .await
        .unwrap()
        .legacy_stream_key
        .unwrap();
    assert!(StreamKeyCipher::is_ciphertext(&stored));

    // And still decrypts to the same key on the next read
    let again = env
        .manager
        .provision_rtmps_ingest(&child(), &owner())
        .await
        .unwrap();
    assert_eq!(again.stream_key, "legacy-plaintext-key");
}

#[tokio::test]
async fn rtmps_session_via_strategy_returns_ingest_pair() {
    let env = build_env(IngressConfig::default()).await;

    let channel = env.manager.ensure_channel_for_child(&child()).await.unwrap();
    env.channels
        .set_legacy_binding(
            &channel.id,
            "arn:aws:ivs:us-east-1:123456789012:channel/legacy",
            "rtmps://ingest.example.net:443/app",
            "legacy-plaintext-key",
        )
        .await
        .unwrap();

    let strategy = env.provisioner.for_mode(ProvisionMode::Rtmps);
    let started = strategy.create_session(&child(), &owner()).await.unwrap();
    assert!(started.webrtc.is_none());
    let rtmps = started.rtmps.unwrap();
    assert_eq!(rtmps.stream_key, "legacy-plaintext-key");

    // WebRTC playback strategy still works against the same channel
    let playback = env
        .provisioner
        .for_playback(PlaybackMode::Webrtc)
        .get_playback(&child(), &owner())
        .await
        .unwrap();
    assert!(playback.playback.viewer_token.is_some());
}

#[tokio::test]
async fn stream_key_reset_writes_ciphertext_and_audits() {
    let env = build_env(IngressConfig::default()).await;
    env.manager.ensure_channel_for_child(&child()).await.unwrap();

    let fresh_key = env.manager.reset_stream_key(&child(), &owner()).await.unwrap();
    assert!(fresh_key.starts_with("sk_us-east-1_"));

    let channel = env.channels.find_by_child(&child()).await.unwrap().unwrap();
    let stored = channel.legacy_stream_key.unwrap();
    assert!(StreamKeyCipher::is_ciphertext(&stored));
    assert_ne!(stored, fresh_key);

    let actions: Vec<AuditAction> = env
        .audit
        .entries()
        .await
        .iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::ChannelKeyReset));
}

#[tokio::test]
async fn liveness_check_failure_is_treated_as_idle() {
    let env = build_env(IngressConfig::default()).await;

    let started = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    // Delete the stage behind the manager's back; get_stage now reports
    // Ok(None), which reads as "not live" and lets reconciliation proceed.
    // A fresh stage is created for the channel on the next start.
    let _ = env.upstream.delete_stage(&started.stage_arn).await;

    let second = env
        .manager
        .create_session(&child(), &owner(), true)
        .await
        .unwrap();
    assert_ne!(second.session.id, started.session.id);
    assert_ne!(second.stage_arn, started.stage_arn);
}
