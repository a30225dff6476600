//! Upstream live-video provider interface
//!
//! The core consumes exactly this surface: stage CRUD, participant token
//! minting, and composition start/stop. `IvsStageControl` talks to the real
//! provider; `InMemoryStageControl` is a deterministic fake for tests and
//! local development.

pub mod ivs;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::ParticipantCapability;
use crate::Result;

pub use ivs::IvsStageControl;
pub use memory::InMemoryStageControl;

/// Upstream view of a stage (WebRTC room)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub arn: String,
    pub name: String,
    /// Set iff a publisher is currently connected upstream
    pub active_session_id: Option<String>,
    pub tags: HashMap<String, String>,
}

/// Participant token mint request
#[derive(Debug, Clone)]
pub struct ParticipantTokenRequest {
    pub stage_arn: String,
    pub user_id: String,
    pub capabilities: Vec<ParticipantCapability>,
    /// Token lifetime in minutes (upstream accepts 1..=20160)
    pub duration_minutes: i32,
    pub attributes: HashMap<String, String>,
}

/// Opaque credential minted upstream
#[derive(Debug, Clone)]
pub struct IssuedParticipantToken {
    pub token: String,
    pub participant_id: String,
    pub expiration: DateTime<Utc>,
}

/// Where a composition writes its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionDestination {
    /// HLS output through a channel resource
    Channel { channel_arn: String },
    /// Archived recording into an S3 storage configuration
    Storage { storage_arn: String },
}

/// Upstream view of a running or finished composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionSummary {
    pub arn: String,
    pub active: bool,
}

/// The upstream stage/token/composition API the core consumes.
///
/// `create_stage` is rate-limited upstream (~5 TPS effective); callers pace
/// batch creation themselves. All operations may fail transiently.
#[async_trait]
pub trait StageControl: Send + Sync {
    async fn create_stage(
        &self,
        name: &str,
        tags: HashMap<String, String>,
    ) -> Result<StageSummary>;

    /// Returns `Ok(None)` iff the stage does not exist
    async fn get_stage(&self, arn: &str) -> Result<Option<StageSummary>>;

    async fn list_stages(&self) -> Result<Vec<StageSummary>>;

    async fn delete_stage(&self, arn: &str) -> Result<()>;

    async fn create_participant_token(
        &self,
        request: ParticipantTokenRequest,
    ) -> Result<IssuedParticipantToken>;

    /// Starts a composition for the stage; `idempotency_token` dedupes
    /// retries within one session. Returns the composition ARN.
    async fn start_composition(
        &self,
        stage_arn: &str,
        idempotency_token: &str,
        destinations: Vec<CompositionDestination>,
    ) -> Result<String>;

    async fn stop_composition(&self, composition_arn: &str) -> Result<()>;

    async fn list_compositions(&self, stage_arn: &str) -> Result<Vec<CompositionSummary>>;
}
