//! Participant credential minting
//!
//! Wraps the upstream token mint with the capability sets, TTLs, and
//! attribute conventions this service uses. Tokens are opaque and never
//! stored; endpoint URLs are derived from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{ChildId, ParticipantCapability, ParticipantGrant, StreamId, UserId};
use crate::upstream::{ParticipantTokenRequest, StageControl};
use crate::Result;

/// Publisher tokens cover one streaming attempt
pub const PUBLISH_TOKEN_MINUTES: i32 = 60;

/// Viewer tokens cover a parent's watch window
pub const SUBSCRIBE_TOKEN_MINUTES: i32 = 12 * 60;

/// Mints publish/subscribe participant tokens against a stage
#[derive(Clone)]
pub struct CredentialIssuer {
    upstream: Arc<dyn StageControl>,
    region: String,
    whip_endpoint: String,
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("region", &self.region)
            .field("whip_endpoint", &self.whip_endpoint)
            .finish()
    }
}

impl CredentialIssuer {
    #[must_use]
    pub fn new(upstream: Arc<dyn StageControl>, region: String, whip_endpoint: String) -> Self {
        Self {
            upstream,
            region,
            whip_endpoint,
        }
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Fixed global WHIP ingest endpoint. The upstream 307-redirects the
    /// first POST to a regional endpoint; clients keep the bearer token
    /// across the redirect.
    #[must_use]
    pub fn whip_url(&self) -> &str {
        &self.whip_endpoint
    }

    /// Regional WebRTC signaling URL for the realtime path
    #[must_use]
    pub fn realtime_url(&self) -> String {
        format!("wss://global.realtime.ivs.{}.amazonaws.com", self.region)
    }

    /// Mint a 60-minute publish token for a stream attempt
    pub async fn publish_token(
        &self,
        stage_arn: &str,
        user_id: &UserId,
        child_id: &ChildId,
        stream_id: &StreamId,
    ) -> Result<ParticipantGrant> {
        let mut attributes = HashMap::new();
        attributes.insert("role".to_string(), "publisher".to_string());
        attributes.insert("childId".to_string(), child_id.to_string());
        attributes.insert("streamId".to_string(), stream_id.to_string());

        self.mint(
            stage_arn,
            user_id,
            vec![ParticipantCapability::Publish],
            PUBLISH_TOKEN_MINUTES,
            attributes,
        )
        .await
    }

    /// Mint a 12-hour subscribe token for a viewer
    pub async fn subscribe_token(
        &self,
        stage_arn: &str,
        user_id: &UserId,
        child_id: Option<&ChildId>,
        stream_id: Option<&StreamId>,
    ) -> Result<ParticipantGrant> {
        let mut attributes = HashMap::new();
        attributes.insert("role".to_string(), "viewer".to_string());
        if let Some(child_id) = child_id {
            attributes.insert("childId".to_string(), child_id.to_string());
        }
        if let Some(stream_id) = stream_id {
            attributes.insert("streamId".to_string(), stream_id.to_string());
        }

        self.mint(
            stage_arn,
            user_id,
            vec![ParticipantCapability::Subscribe],
            SUBSCRIBE_TOKEN_MINUTES,
            attributes,
        )
        .await
    }

    async fn mint(
        &self,
        stage_arn: &str,
        user_id: &UserId,
        capabilities: Vec<ParticipantCapability>,
        duration_minutes: i32,
        attributes: HashMap<String, String>,
    ) -> Result<ParticipantGrant> {
        let issued = self
            .upstream
            .create_participant_token(ParticipantTokenRequest {
                stage_arn: stage_arn.to_string(),
                user_id: user_id.to_string(),
                capabilities: capabilities.clone(),
                duration_minutes,
                attributes: attributes.clone(),
            })
            .await?;

        Ok(ParticipantGrant {
            token: issued.token,
            participant_id: issued.participant_id,
            expires_at: issued.expiration,
            capabilities,
            stage_arn: stage_arn.to_string(),
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::InMemoryStageControl;

    #[tokio::test]
    async fn test_publish_token_attributes() {
        let upstream = InMemoryStageControl::new();
        let stage_arn = upstream.seed_stage("kid-stream-x", None);
        let issuer = Arc::new(CredentialIssuer::new(
            Arc::new(upstream),
            "us-east-1".to_string(),
            "https://global.whip.live-video.net".to_string(),
        ));

        let grant = issuer
            .publish_token(
                &stage_arn,
                &UserId::from("U1"),
                &ChildId::from("C1"),
                &StreamId::from("S1"),
            )
            .await
            .unwrap();

        assert!(!grant.token.is_empty());
        assert_eq!(grant.capabilities, vec![ParticipantCapability::Publish]);
        assert_eq!(grant.attributes.get("role").unwrap(), "publisher");
        assert_eq!(grant.attributes.get("childId").unwrap(), "C1");
        assert_eq!(grant.attributes.get("streamId").unwrap(), "S1");
        // 60-minute publisher TTL
        let ttl = grant.expires_at - chrono::Utc::now();
        assert!(ttl <= chrono::Duration::minutes(60));
        assert!(ttl > chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_subscribe_token_ttl() {
        let upstream = InMemoryStageControl::new();
        let stage_arn = upstream.seed_stage("kid-stream-y", None);
        let issuer = CredentialIssuer::new(
            Arc::new(upstream),
            "us-west-2".to_string(),
            "https://global.whip.live-video.net".to_string(),
        );

        let grant = issuer
            .subscribe_token(
                &stage_arn,
                &UserId::from("P1"),
                Some(&ChildId::from("C1")),
                None,
            )
            .await
            .unwrap();

        assert_eq!(grant.capabilities, vec![ParticipantCapability::Subscribe]);
        let ttl = grant.expires_at - chrono::Utc::now();
        assert!(ttl > chrono::Duration::hours(11));
        assert!(ttl <= chrono::Duration::hours(12));
    }

    #[test]
    fn test_realtime_url_derivation() {
        let issuer = CredentialIssuer::new(
            Arc::new(InMemoryStageControl::new()),
            "eu-west-1".to_string(),
            "https://global.whip.live-video.net".to_string(),
        );
        assert_eq!(
            issuer.realtime_url(),
            "wss://global.realtime.ivs.eu-west-1.amazonaws.com"
        );
    }
}
