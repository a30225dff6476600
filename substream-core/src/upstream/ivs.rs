//! IVS Real-Time Streaming implementation of [`StageControl`]

use std::collections::HashMap;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ivsrealtime::error::DisplayErrorContext;
use aws_sdk_ivsrealtime::types::{
    ChannelDestinationConfiguration, CompositionState, DestinationConfiguration,
    ParticipantTokenCapability, S3DestinationConfiguration,
};
use aws_sdk_ivsrealtime::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::AwsConfig;
use crate::models::ParticipantCapability;
use crate::{Error, Result};

use super::{
    CompositionDestination, CompositionSummary, IssuedParticipantToken, ParticipantTokenRequest,
    StageControl, StageSummary,
};

/// Production upstream client over the IVS Real-Time Streaming API
#[derive(Clone)]
pub struct IvsStageControl {
    client: Client,
}

impl std::fmt::Debug for IvsStageControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvsStageControl").finish()
    }
}

impl IvsStageControl {
    /// Build a client from application configuration.
    ///
    /// Credentials resolve through the default provider chain (env vars,
    /// profile, IMDS); `profile` and `endpoint_url` narrow the chain for
    /// local development.
    pub async fn from_config(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if !config.profile.is_empty() {
            loader = loader.profile_name(&config.profile);
        }
        if !config.endpoint_url.is_empty() {
            loader = loader.endpoint_url(&config.endpoint_url);
        }
        let sdk_config = loader.load().await;
        Self {
            client: Client::new(&sdk_config),
        }
    }

    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

fn upstream_error<E: std::error::Error + Send + Sync + 'static>(
    operation: &str,
    err: aws_sdk_ivsrealtime::error::SdkError<E>,
) -> Error {
    Error::Upstream(format!("{operation}: {}", DisplayErrorContext(&err)))
}

fn to_chrono(dt: &aws_sdk_ivsrealtime::primitives::DateTime) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
        .ok_or_else(|| Error::Upstream("Unrepresentable timestamp from upstream".to_string()))
}

fn to_sdk_capability(capability: ParticipantCapability) -> ParticipantTokenCapability {
    match capability {
        ParticipantCapability::Publish => ParticipantTokenCapability::Publish,
        ParticipantCapability::Subscribe => ParticipantTokenCapability::Subscribe,
    }
}

#[async_trait]
impl StageControl for IvsStageControl {
    async fn create_stage(
        &self,
        name: &str,
        tags: HashMap<String, String>,
    ) -> Result<StageSummary> {
        let output = self
            .client
            .create_stage()
            .name(name)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| upstream_error("CreateStage", e))?;

        let stage = output
            .stage()
            .ok_or_else(|| Error::Upstream("CreateStage returned no stage".to_string()))?;
        let arn = stage.arn();

        debug!(stage_arn = %arn, name = %name, "Created upstream stage");

        Ok(StageSummary {
            arn: arn.to_string(),
            name: stage.name().unwrap_or(name).to_string(),
            active_session_id: stage.active_session_id().map(String::from),
            tags: stage.tags().cloned().unwrap_or_default(),
        })
    }

    async fn get_stage(&self, arn: &str) -> Result<Option<StageSummary>> {
        let output = match self.client.get_stage().arn(arn).send().await {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    return Ok(None);
                }
                return Err(upstream_error("GetStage", err));
            }
        };

        Ok(output.stage().map(|stage| StageSummary {
            arn: stage.arn().to_string(),
            name: stage.name().unwrap_or_default().to_string(),
            active_session_id: stage.active_session_id().map(String::from),
            tags: stage.tags().cloned().unwrap_or_default(),
        }))
    }

    async fn list_stages(&self) -> Result<Vec<StageSummary>> {
        let mut stages = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.list_stages().max_results(100);
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| upstream_error("ListStages", e))?;

            for summary in output.stages() {
                let arn = summary.arn();
                stages.push(StageSummary {
                    arn: arn.to_string(),
                    name: summary.name().unwrap_or_default().to_string(),
                    active_session_id: summary.active_session_id().map(String::from),
                    tags: summary.tags().cloned().unwrap_or_default(),
                });
            }

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(stages)
    }

    async fn delete_stage(&self, arn: &str) -> Result<()> {
        self.client
            .delete_stage()
            .arn(arn)
            .send()
            .await
            .map_err(|e| upstream_error("DeleteStage", e))?;
        debug!(stage_arn = %arn, "Deleted upstream stage");
        Ok(())
    }

    async fn create_participant_token(
        &self,
        request: ParticipantTokenRequest,
    ) -> Result<IssuedParticipantToken> {
        let output = self
            .client
            .create_participant_token()
            .stage_arn(&request.stage_arn)
            .user_id(&request.user_id)
            .set_capabilities(Some(
                request
                    .capabilities
                    .iter()
                    .copied()
                    .map(to_sdk_capability)
                    .collect(),
            ))
            .duration(request.duration_minutes)
            .set_attributes(Some(request.attributes))
            .send()
            .await
            .map_err(|e| upstream_error("CreateParticipantToken", e))?;

        let token = output.participant_token().ok_or_else(|| {
            Error::Upstream("CreateParticipantToken returned no token".to_string())
        })?;

        Ok(IssuedParticipantToken {
            token: token
                .token()
                .ok_or_else(|| {
                    Error::Upstream("CreateParticipantToken returned empty token".to_string())
                })?
                .to_string(),
            participant_id: token.participant_id().unwrap_or_default().to_string(),
            expiration: token
                .expiration_time()
                .map(to_chrono)
                .transpose()?
                .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(i64::from(request.duration_minutes))),
        })
    }

    async fn start_composition(
        &self,
        stage_arn: &str,
        idempotency_token: &str,
        destinations: Vec<CompositionDestination>,
    ) -> Result<String> {
        let mut request = self
            .client
            .start_composition()
            .stage_arn(stage_arn)
            .idempotency_token(idempotency_token);

        for destination in destinations {
            let built = match destination {
                CompositionDestination::Channel { channel_arn } => {
                    DestinationConfiguration::builder()
                        .channel(
                            ChannelDestinationConfiguration::builder()
                                .channel_arn(channel_arn)
                                .build()
                                .map_err(|e| Error::Upstream(e.to_string()))?,
                        )
                        .build()
                }
                CompositionDestination::Storage { storage_arn } => {
                    DestinationConfiguration::builder()
                        .s3(S3DestinationConfiguration::builder()
                            .storage_configuration_arn(storage_arn)
                            .build()
                            .map_err(|e| Error::Upstream(e.to_string()))?)
                        .build()
                }
            };
            request = request.destinations(built);
        }

        let output = request
            .send()
            .await
            .map_err(|e| upstream_error("StartComposition", e))?;

        output
            .composition()
            .map(|c| c.arn().to_string())
            .ok_or_else(|| Error::Upstream("StartComposition returned no ARN".to_string()))
    }

    async fn stop_composition(&self, composition_arn: &str) -> Result<()> {
        self.client
            .stop_composition()
            .arn(composition_arn)
            .send()
            .await
            .map_err(|e| upstream_error("StopComposition", e))?;
        Ok(())
    }

    async fn list_compositions(&self, stage_arn: &str) -> Result<Vec<CompositionSummary>> {
        let output = self
            .client
            .list_compositions()
            .filter_by_stage_arn(stage_arn)
            .send()
            .await
            .map_err(|e| upstream_error("ListCompositions", e))?;

        Ok(output
            .compositions()
            .iter()
            .map(|summary| {
                let arn = summary.arn();
                CompositionSummary {
                    arn: arn.to_string(),
                    active: matches!(summary.state(), CompositionState::Active),
                }
            })
            .collect())
    }
}
