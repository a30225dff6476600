//! In-memory [`StageControl`] fake for tests and local development
//!
//! Deterministic: ARNs and participant ids are sequence-numbered. Failure
//! injection counters make the next N calls of an operation fail, which is
//! how the rollback and degraded-path behavior is exercised.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use crate::{Error, Result};

use super::{
    CompositionDestination, CompositionSummary, IssuedParticipantToken, ParticipantTokenRequest,
    StageControl, StageSummary,
};

#[derive(Debug, Default)]
struct State {
    stages: HashMap<String, StageSummary>,
    compositions: HashMap<String, CompositionSummary>,
    composition_stage: HashMap<String, String>,
    sequence: u64,
    created: u64,
    deleted: u64,
    tokens_minted: u64,
    fail_creates: u64,
    fail_deletes: u64,
    fail_tokens: u64,
}

/// Shared-handle in-memory upstream
#[derive(Debug, Clone, Default)]
pub struct InMemoryStageControl {
    state: Arc<Mutex<State>>,
}

impl InMemoryStageControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a stage, optionally already holding a live upstream session
    pub fn seed_stage(&self, name: &str, active_session_id: Option<&str>) -> String {
        let mut state = self.state.lock();
        state.sequence += 1;
        let arn = format!("arn:aws:ivs:fake:stage/{}", state.sequence);
        state.stages.insert(
            arn.clone(),
            StageSummary {
                arn: arn.clone(),
                name: name.to_string(),
                active_session_id: active_session_id.map(String::from),
                tags: HashMap::new(),
            },
        );
        arn
    }

    /// Flip the upstream "actively streaming" signal for a stage
    pub fn set_active_session(&self, arn: &str, session_id: Option<&str>) {
        let mut state = self.state.lock();
        if let Some(stage) = state.stages.get_mut(arn) {
            stage.active_session_id = session_id.map(String::from);
        }
    }

    /// Make the next `n` `create_stage` calls fail
    pub fn fail_next_creates(&self, n: u64) {
        self.state.lock().fail_creates = n;
    }

    /// Make the next `n` `delete_stage` calls fail
    pub fn fail_next_deletes(&self, n: u64) {
        self.state.lock().fail_deletes = n;
    }

    /// Make the next `n` `create_participant_token` calls fail
    pub fn fail_next_tokens(&self, n: u64) {
        self.state.lock().fail_tokens = n;
    }

    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.state.lock().created
    }

    #[must_use]
    pub fn deleted_count(&self) -> u64 {
        self.state.lock().deleted
    }

    #[must_use]
    pub fn tokens_minted(&self) -> u64 {
        self.state.lock().tokens_minted
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.state.lock().stages.len()
    }

    #[must_use]
    pub fn stage_exists(&self, arn: &str) -> bool {
        self.state.lock().stages.contains_key(arn)
    }
}

#[async_trait]
impl StageControl for InMemoryStageControl {
    async fn create_stage(
        &self,
        name: &str,
        tags: HashMap<String, String>,
    ) -> Result<StageSummary> {
        let mut state = self.state.lock();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(Error::Upstream("CreateStage: injected failure".to_string()));
        }
        state.sequence += 1;
        state.created += 1;
        let arn = format!("arn:aws:ivs:fake:stage/{}", state.sequence);
        let summary = StageSummary {
            arn: arn.clone(),
            name: name.to_string(),
            active_session_id: None,
            tags,
        };
        state.stages.insert(arn, summary.clone());
        Ok(summary)
    }

    async fn get_stage(&self, arn: &str) -> Result<Option<StageSummary>> {
        Ok(self.state.lock().stages.get(arn).cloned())
    }

    async fn list_stages(&self) -> Result<Vec<StageSummary>> {
        Ok(self.state.lock().stages.values().cloned().collect())
    }

    async fn delete_stage(&self, arn: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(Error::Upstream("DeleteStage: injected failure".to_string()));
        }
        if state.stages.remove(arn).is_none() {
            return Err(Error::NotFound(format!("Stage not found: {arn}")));
        }
        state.deleted += 1;
        Ok(())
    }

    async fn create_participant_token(
        &self,
        request: ParticipantTokenRequest,
    ) -> Result<IssuedParticipantToken> {
        let mut state = self.state.lock();
        if state.fail_tokens > 0 {
            state.fail_tokens -= 1;
            return Err(Error::Upstream(
                "CreateParticipantToken: injected failure".to_string(),
            ));
        }
        if !state.stages.contains_key(&request.stage_arn) {
            return Err(Error::NotFound(format!(
                "Stage not found: {}",
                request.stage_arn
            )));
        }
        state.sequence += 1;
        state.tokens_minted += 1;
        Ok(IssuedParticipantToken {
            token: format!("tok-{}", state.sequence),
            participant_id: format!("participant-{}", state.sequence),
            expiration: Utc::now() + Duration::minutes(i64::from(request.duration_minutes)),
        })
    }

    async fn start_composition(
        &self,
        stage_arn: &str,
        idempotency_token: &str,
        _destinations: Vec<CompositionDestination>,
    ) -> Result<String> {
        let mut state = self.state.lock();
        if !state.stages.contains_key(stage_arn) {
            return Err(Error::NotFound(format!("Stage not found: {stage_arn}")));
        }
        // Idempotency: a retry with the same token returns the same ARN
        let arn = format!("arn:aws:ivs:fake:composition/{idempotency_token}");
        state.compositions.insert(
            arn.clone(),
            CompositionSummary {
                arn: arn.clone(),
                active: true,
            },
        );
        state
            .composition_stage
            .insert(arn.clone(), stage_arn.to_string());
        Ok(arn)
    }

    async fn stop_composition(&self, composition_arn: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.compositions.get_mut(composition_arn) {
            Some(composition) => {
                composition.active = false;
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "Composition not found: {composition_arn}"
            ))),
        }
    }

    async fn list_compositions(&self, stage_arn: &str) -> Result<Vec<CompositionSummary>> {
        let state = self.state.lock();
        Ok(state
            .compositions
            .values()
            .filter(|c| {
                state
                    .composition_stage
                    .get(&c.arn)
                    .is_some_and(|s| s == stage_arn)
            })
            .cloned()
            .collect())
    }
}
