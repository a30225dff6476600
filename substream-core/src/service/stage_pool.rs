//! Pre-warmed upstream stage pool
//!
//! The upstream create-stage call is rate-limited (~5 TPS effective), so
//! stages are created ahead of demand by a background replenishment loop and
//! handed out on allocation. Allocation marks an entry in-use before the
//! token mint so no other caller can grab it during the upstream RPC; a
//! failed mint rolls the entry back to idle without deleting the stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::{distr::Alphanumeric, Rng, RngExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::models::{
    ChildId, PooledStage, PoolStatus, StageAllocation, StreamId, SubscribeAllocation, UserId,
};
use crate::service::credentials::CredentialIssuer;
use crate::upstream::{StageControl, StageSummary};
use crate::{Error, Result};

/// Tag marking a stage as pool-owned
const POOL_TAG: &str = "pool";

/// Tag carrying the creation timestamp, for age-based cleanup after restart
const CREATED_AT_TAG: &str = "createdAt";

#[derive(Debug, Default)]
struct PoolState {
    entries: HashMap<String, PooledStage>,
    /// Upstream creates in flight; reserves capacity against `max_pool_size`
    pending_creates: usize,
    initialized: bool,
}

impl PoolState {
    fn available(&self) -> usize {
        self.entries.values().filter(|e| !e.in_use).count()
    }

    fn total_with_pending(&self) -> usize {
        self.entries.len() + self.pending_creates
    }
}

/// Process-wide pool of pre-created stages.
///
/// Constructed once at service boot; `initialize` recovers pool-owned stages
/// by prefix scan and starts the replenishment loop, `shutdown` stops it.
pub struct StagePool {
    config: PoolConfig,
    upstream: Arc<dyn StageControl>,
    issuer: Arc<CredentialIssuer>,
    state: Mutex<PoolState>,
    /// Single-flight bit for the replenishment pass
    replenishing: AtomicBool,
    init_guard: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("StagePool")
            .field("config", &self.config)
            .field("status", &status)
            .finish()
    }
}

impl StagePool {
    #[must_use]
    pub fn new(
        config: PoolConfig,
        upstream: Arc<dyn StageControl>,
        issuer: Arc<CredentialIssuer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            upstream,
            issuer,
            state: Mutex::new(PoolState::default()),
            replenishing: AtomicBool::new(false),
            init_guard: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Idempotent. Recovers pool-owned stages from upstream by prefix scan
    /// and starts the replenishment loop (which runs once immediately).
    ///
    /// A recovered stage with a live upstream session is loaded in-use, with
    /// its `stream_id` taken from the upstream session id.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let _guard = self.init_guard.lock().await;
        if self.state.lock().initialized {
            return Ok(());
        }

        let stages = self.upstream.list_stages().await?;

        {
            let mut state = self.state.lock();
            for stage in stages {
                if !stage.name.starts_with(&self.config.stage_prefix) {
                    continue;
                }
                let created_at = stage
                    .tags
                    .get(CREATED_AT_TAG)
                    .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
                    .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

                let mut entry = PooledStage::idle(stage.arn.clone(), stage.name, created_at);
                if let Some(session_id) = stage.active_session_id {
                    entry.mark_allocated(StreamId::from_string(session_id));
                }
                state.entries.insert(stage.arn, entry);
            }
            state.initialized = true;

            info!(
                total = state.entries.len(),
                available = state.available(),
                prefix = %self.config.stage_prefix,
                "Stage pool initialized from upstream"
            );
        }

        self.spawn_replenish_loop();
        Ok(())
    }

    fn spawn_replenish_loop(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let cancelled = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.replenish_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = interval.tick() => pool.replenish().await,
                }
            }
            debug!("Stage pool replenishment loop stopped");
        });
    }

    /// Allocate a stage for a new stream and mint its publish token.
    ///
    /// Picks any idle entry, creating one on demand when the pool is empty
    /// (bounded by `max_pool_size`). The entry is marked in-use before the
    /// token mint; a failed mint rolls it back to idle.
    pub async fn allocate(
        self: &Arc<Self>,
        stream_id: StreamId,
        user_id: &UserId,
        child_id: &ChildId,
    ) -> Result<StageAllocation> {
        if !self.state.lock().initialized {
            self.initialize().await?;
        }

        let grabbed = {
            let mut state = self.state.lock();
            if state
                .entries
                .values()
                .any(|e| e.stream_id.as_ref() == Some(&stream_id))
            {
                return Err(Error::InvalidInput(format!(
                    "Stream id already bound to a stage: {stream_id}"
                )));
            }
            match state.entries.values_mut().find(|e| !e.in_use) {
                Some(entry) => {
                    entry.mark_allocated(stream_id.clone());
                    Some((entry.arn.clone(), entry.name.clone()))
                }
                None => None,
            }
        };

        let (arn, name) = match grabbed {
            Some(found) => found,
            None => self.create_on_demand(&stream_id).await?,
        };

        match self
            .issuer
            .publish_token(&arn, user_id, child_id, &stream_id)
            .await
        {
            Ok(grant) => {
                debug!(stage_arn = %arn, stream_id = %stream_id, "Allocated stage");
                Ok(StageAllocation {
                    stage_arn: arn,
                    stage_name: name,
                    stream_id,
                    publish_token: grant.token,
                    participant_id: grant.participant_id,
                    expires_at: grant.expires_at,
                    whip_url: self.issuer.whip_url().to_string(),
                    region: self.issuer.region().to_string(),
                })
            }
            Err(e) => {
                // Roll the entry back to idle; the stage itself is reusable
                let mut state = self.state.lock();
                if let Some(entry) = state.entries.get_mut(&arn) {
                    entry.clear_allocation();
                }
                warn!(stage_arn = %arn, stream_id = %stream_id, "Publish token mint failed, rolled back allocation: {e}");
                Err(e)
            }
        }
    }

    /// On-demand creation bypasses batch pacing but still counts against
    /// `max_pool_size`. The entry is inserted already allocated.
    async fn create_on_demand(&self, stream_id: &StreamId) -> Result<(String, String)> {
        {
            let mut state = self.state.lock();
            if state.total_with_pending() >= self.config.max_pool_size {
                return Err(Error::ResourceExhausted(format!(
                    "Stage pool at capacity ({})",
                    self.config.max_pool_size
                )));
            }
            state.pending_creates += 1;
        }

        let created = self.create_pool_stage().await;

        let mut state = self.state.lock();
        state.pending_creates -= 1;
        match created {
            Ok(stage) => {
                let mut entry = PooledStage::idle(stage.arn.clone(), stage.name.clone(), Utc::now());
                entry.mark_allocated(stream_id.clone());
                state.entries.insert(stage.arn.clone(), entry);
                info!(stage_arn = %stage.arn, "Created stage on demand");
                Ok((stage.arn, stage.name))
            }
            Err(e) => Err(Error::ResourceExhausted(format!(
                "On-demand stage creation failed: {e}"
            ))),
        }
    }

    async fn create_pool_stage(&self) -> Result<StageSummary> {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let name = format!(
            "{}-{}-{}",
            self.config.stage_prefix,
            Utc::now().timestamp_millis(),
            suffix
        );

        let mut tags = HashMap::new();
        tags.insert(POOL_TAG.to_string(), "true".to_string());
        tags.insert(CREATED_AT_TAG.to_string(), Utc::now().to_rfc3339());

        self.upstream.create_stage(&name, tags).await
    }

    /// Mint a subscribe token against a pooled stage. Pool state untouched.
    pub async fn create_subscribe_token(
        &self,
        stage_arn: &str,
        user_id: &UserId,
        stream_id: &StreamId,
    ) -> Result<SubscribeAllocation> {
        let grant = self
            .issuer
            .subscribe_token(stage_arn, user_id, None, Some(stream_id))
            .await?;
        Ok(SubscribeAllocation {
            stage_arn: stage_arn.to_string(),
            token: grant.token,
            participant_id: grant.participant_id,
            expires_at: grant.expires_at,
            region: self.issuer.region().to_string(),
        })
    }

    /// Release a stage after its stream ends. Idempotent.
    ///
    /// Prefers deleting the stage upstream; when the delete fails, the entry
    /// is kept as idle so the next cleanup pass can reclaim it. Always
    /// triggers a non-blocking replenish.
    pub async fn release(self: &Arc<Self>, stage_arn: &str) {
        let known = self.state.lock().entries.contains_key(stage_arn);
        if !known {
            debug!(stage_arn = %stage_arn, "Release of unknown stage ignored");
            return;
        }

        // The entry stays in-use during the upstream call so no other
        // allocation can grab it mid-delete.
        match self.upstream.delete_stage(stage_arn).await {
            Ok(()) => {
                self.state.lock().entries.remove(stage_arn);
                debug!(stage_arn = %stage_arn, "Released and deleted stage");
            }
            Err(e) => {
                let mut state = self.state.lock();
                if let Some(entry) = state.entries.get_mut(stage_arn) {
                    entry.clear_allocation();
                }
                warn!(stage_arn = %stage_arn, "Stage delete failed on release, keeping as idle: {e}");
            }
        }

        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.replenish().await });
    }

    /// Roll a marked allocation back to idle without deleting the stage.
    /// Used when the caller abandons a stream between allocation and the
    /// response (treated like a failed token mint).
    pub fn rollback_allocation(&self, stream_id: &StreamId) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .entries
            .values_mut()
            .find(|e| e.stream_id.as_ref() == Some(stream_id))
        {
            warn!(stage_arn = %entry.arn, stream_id = %stream_id, "Rolled back abandoned allocation");
            entry.clear_allocation();
        }
    }

    #[must_use]
    pub fn find_by_stream_id(&self, stream_id: &StreamId) -> Option<PooledStage> {
        self.state
            .lock()
            .entries
            .values()
            .find(|e| e.stream_id.as_ref() == Some(stream_id))
            .cloned()
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let available = state.available();
        let total = state.entries.len();
        PoolStatus {
            available,
            in_use: total - available,
            total,
        }
    }

    /// Stop the replenishment loop. In-use stages are left alone.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        info!("Stage pool shut down");
    }

    /// One replenishment pass: cleanup, then paced batch creation.
    /// Single-flight; a pass already in progress makes this a no-op.
    pub async fn replenish(&self) {
        if self.replenishing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.run_replenish().await;
        self.replenishing.store(false, Ordering::SeqCst);
    }

    async fn run_replenish(&self) {
        self.cleanup_old_stages().await;

        let to_create = {
            let state = self.state.lock();
            let available = state.available();
            let deficit = self.config.target_pool_size.saturating_sub(available);
            let headroom = self
                .config
                .max_pool_size
                .saturating_sub(state.total_with_pending());
            deficit.min(headroom).min(self.config.create_batch_limit)
        };
        if to_create == 0 {
            return;
        }

        debug!(to_create, "Replenishing stage pool");
        for i in 0..to_create {
            {
                let mut state = self.state.lock();
                if state.total_with_pending() >= self.config.max_pool_size {
                    break;
                }
                state.pending_creates += 1;
            }

            let created = self.create_pool_stage().await;

            let batch_failed = {
                let mut state = self.state.lock();
                state.pending_creates -= 1;
                match created {
                    Ok(stage) => {
                        state.entries.insert(
                            stage.arn.clone(),
                            PooledStage::idle(stage.arn, stage.name, Utc::now()),
                        );
                        false
                    }
                    Err(e) => {
                        // Stop the batch on the first failure; the next tick is
                        // the retry. Tight retries here would fight the upstream
                        // rate limit this pool exists to absorb.
                        warn!("Stage creation failed during replenish, stopping batch: {e}");
                        true
                    }
                }
            };

            if batch_failed {
                break;
            }

            if i + 1 < to_create {
                tokio::time::sleep(self.config.create_spacing()).await;
            }
        }
    }

    /// Delete idle entries older than `stage_max_age`, up to
    /// `cleanup_batch_limit` per pass. Entries are pulled from the map while
    /// the delete is in flight and put back if it fails.
    async fn cleanup_old_stages(&self) {
        let now = Utc::now();
        let candidates: Vec<PooledStage> = {
            let mut state = self.state.lock();
            let arns: Vec<String> = state
                .entries
                .values()
                .filter(|e| !e.in_use && e.age(now) > self.config.stage_max_age())
                .take(self.config.cleanup_batch_limit)
                .map(|e| e.arn.clone())
                .collect();
            arns.iter()
                .filter_map(|arn| state.entries.remove(arn))
                .collect()
        };

        for entry in candidates {
            match self.upstream.delete_stage(&entry.arn).await {
                Ok(()) => {
                    info!(stage_arn = %entry.arn, "Cleaned up aged-out stage");
                }
                Err(e) => {
                    warn!(stage_arn = %entry.arn, "Cleanup delete failed, retaining stage: {e}");
                    self.state.lock().entries.insert(entry.arn.clone(), entry);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::InMemoryStageControl;

    fn test_pool(config: PoolConfig) -> (Arc<StagePool>, InMemoryStageControl) {
        let upstream = InMemoryStageControl::new();
        let shared: Arc<dyn StageControl> = Arc::new(upstream.clone());
        let issuer = Arc::new(CredentialIssuer::new(
            Arc::clone(&shared),
            "us-east-1".to_string(),
            "https://global.whip.live-video.net".to_string(),
        ));
        (StagePool::new(config, shared, issuer), upstream)
    }

    #[tokio::test]
    async fn test_stage_names_carry_prefix() {
        let (pool, upstream) = test_pool(PoolConfig {
            target_pool_size: 0,
            ..PoolConfig::default()
        });
        pool.initialize().await.unwrap();

        pool.allocate(StreamId::from("S1"), &UserId::from("U1"), &ChildId::from("C1"))
            .await
            .unwrap();

        let stages = upstream.list_stages().await.unwrap();
        assert_eq!(stages.len(), 1);
        assert!(stages[0].name.starts_with("kid-stream-"));
        assert_eq!(stages[0].tags.get("pool").unwrap(), "true");
        assert!(stages[0].tags.contains_key("createdAt"));
    }

    #[tokio::test]
    async fn test_initialize_ignores_foreign_stages() {
        let (pool, upstream) = test_pool(PoolConfig {
            target_pool_size: 0,
            ..PoolConfig::default()
        });
        upstream.seed_stage("kid-stream-recovered", None);
        upstream.seed_stage("someone-elses-stage", None);

        pool.initialize().await.unwrap();

        let status = pool.status();
        assert_eq!(status.total, 1);
        assert_eq!(status.available, 1);
    }

    #[tokio::test]
    async fn test_initialize_recovers_in_use_stages() {
        let (pool, upstream) = test_pool(PoolConfig {
            target_pool_size: 0,
            ..PoolConfig::default()
        });
        upstream.seed_stage("kid-stream-busy", Some("upstream-session-1"));

        pool.initialize().await.unwrap();

        let status = pool.status();
        assert_eq!(status.in_use, 1);
        let entry = pool
            .find_by_stream_id(&StreamId::from("upstream-session-1"))
            .unwrap();
        assert!(entry.in_use);
        assert!(entry.allocated_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_stream_id_rejected() {
        let (pool, _upstream) = test_pool(PoolConfig {
            target_pool_size: 0,
            ..PoolConfig::default()
        });
        pool.initialize().await.unwrap();

        pool.allocate(StreamId::from("S1"), &UserId::from("U1"), &ChildId::from("C1"))
            .await
            .unwrap();
        let err = pool
            .allocate(StreamId::from("S1"), &UserId::from("U1"), &ChildId::from("C1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_allocate_at_capacity_is_resource_exhausted() {
        let (pool, _upstream) = test_pool(PoolConfig {
            target_pool_size: 0,
            max_pool_size: 1,
            ..PoolConfig::default()
        });
        pool.initialize().await.unwrap();

        pool.allocate(StreamId::from("S1"), &UserId::from("U1"), &ChildId::from("C1"))
            .await
            .unwrap();
        let err = pool
            .allocate(StreamId::from("S2"), &UserId::from("U1"), &ChildId::from("C1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn test_release_unknown_stage_is_noop() {
        let (pool, _upstream) = test_pool(PoolConfig {
            target_pool_size: 0,
            ..PoolConfig::default()
        });
        pool.initialize().await.unwrap();
        pool.release("arn:aws:ivs:fake:stage/unknown").await;
        assert_eq!(pool.status().total, 0);
    }
}
