//! Service initialization and dependency injection

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::repository::{
    PgAuditRepository, PgChannelRepository, PgProfileRepository, PgSessionRepository,
};
use crate::service::{
    CredentialIssuer, PlaybackTokenService, Provisioner, SessionManager, SessionManagerDeps,
    StagePool, StreamKeyCipher,
};
use crate::upstream::{IvsStageControl, StageControl};
use crate::Config;

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    pub stage_pool: Arc<StagePool>,
    pub session_manager: Arc<SessionManager>,
    pub provisioner: Arc<Provisioner>,
    pub issuer: Arc<CredentialIssuer>,
}

/// Initialize all core services against the production upstream
pub async fn init_services(pool: PgPool, config: &Config) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let upstream: Arc<dyn StageControl> =
        Arc::new(IvsStageControl::from_config(&config.aws).await);

    let issuer = Arc::new(CredentialIssuer::new(
        Arc::clone(&upstream),
        config.aws.region.clone(),
        config.ingress.whip_endpoint.clone(),
    ));

    let cipher = if config.stream_key.encryption_key.is_empty() {
        None
    } else {
        Some(StreamKeyCipher::from_hex_key(
            &config.stream_key.encryption_key,
        )?)
    };

    let playback_signer = if config.playback.signing_key.is_empty() {
        None
    } else {
        Some(PlaybackTokenService::new(
            &config.playback.signing_key,
            config.playback.key_pair_id.clone(),
        )?)
    };

    let session_manager = Arc::new(SessionManager::new(SessionManagerDeps {
        channels: Arc::new(PgChannelRepository::new(pool.clone())),
        sessions: Arc::new(PgSessionRepository::new(pool.clone())),
        profiles: Arc::new(PgProfileRepository::new(pool.clone())),
        audit: Arc::new(PgAuditRepository::new(pool)),
        upstream: Arc::clone(&upstream),
        issuer: Arc::clone(&issuer),
        cipher,
        playback_signer,
        ingress: config.ingress.clone(),
    }));

    let stage_pool = StagePool::new(config.pool.clone(), upstream, Arc::clone(&issuer));

    let provisioner = Arc::new(Provisioner::new(Arc::clone(&session_manager)));

    info!("Services initialized");
    Ok(Services {
        stage_pool,
        session_manager,
        provisioner,
        issuer,
    })
}
