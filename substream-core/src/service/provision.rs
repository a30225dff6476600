//! Provisioning strategies
//!
//! One `SessionManager` carries the lifecycle; the two thin strategies here
//! select what a session hands back to the publisher: WebRTC stage
//! credentials or the legacy RTMPS ingest pair. Playback follows the same
//! split (stage subscribe token vs signed HLS).

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ChildId, UserId};
use crate::service::session::{
    PlaybackInfo, RealtimeIngest, RtmpsIngest, SessionManager, StartedSession,
};
use crate::{Error, Result};

/// Publisher transport variant, selected by the `mode` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisionMode {
    #[default]
    Webrtc,
    Rtmps,
}

impl ProvisionMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "webrtc" => Ok(Self::Webrtc),
            "rtmps" => Ok(Self::Rtmps),
            other => Err(Error::InvalidInput(format!(
                "Unknown provisioning mode: {other}"
            ))),
        }
    }
}

/// Viewer transport variant for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    #[default]
    Webrtc,
    Hls,
}

impl PlaybackMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "webrtc" => Ok(Self::Webrtc),
            "hls" => Ok(Self::Hls),
            other => Err(Error::InvalidInput(format!(
                "Unknown playback mode: {other}"
            ))),
        }
    }
}

/// Mode-specific ingest credentials
#[derive(Debug, Clone)]
pub enum IngestDetails {
    Webrtc(RealtimeIngest),
    Rtmps(RtmpsIngest),
}

/// The capability set a provisioning variant implements
#[async_trait]
pub trait ProvisionStrategy: Send + Sync {
    async fn provision_ingest(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<IngestDetails>;

    async fn create_session(&self, child_id: &ChildId, caller: &UserId)
        -> Result<StartedSession>;

    async fn get_playback(&self, child_id: &ChildId, caller: &UserId) -> Result<PlaybackInfo>;
}

/// WebRTC variant: stage participant tokens end to end
#[derive(Debug, Clone)]
pub struct WebrtcProvisioner {
    manager: Arc<SessionManager>,
}

impl WebrtcProvisioner {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ProvisionStrategy for WebrtcProvisioner {
    async fn provision_ingest(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<IngestDetails> {
        let ingest = self.manager.provision_ingest(child_id, caller).await?;
        Ok(IngestDetails::Webrtc(ingest))
    }

    async fn create_session(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<StartedSession> {
        self.manager.create_session(child_id, caller, true).await
    }

    async fn get_playback(&self, child_id: &ChildId, caller: &UserId) -> Result<PlaybackInfo> {
        self.manager.get_playback(child_id, caller, false).await
    }
}

/// Legacy RTMPS variant: channel ingest endpoint plus decrypted stream key
#[derive(Debug, Clone)]
pub struct RtmpsProvisioner {
    manager: Arc<SessionManager>,
}

impl RtmpsProvisioner {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ProvisionStrategy for RtmpsProvisioner {
    async fn provision_ingest(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<IngestDetails> {
        let ingest = self.manager.provision_rtmps_ingest(child_id, caller).await?;
        Ok(IngestDetails::Rtmps(ingest))
    }

    async fn create_session(
        &self,
        child_id: &ChildId,
        caller: &UserId,
    ) -> Result<StartedSession> {
        self.manager.create_session(child_id, caller, false).await
    }

    async fn get_playback(&self, child_id: &ChildId, caller: &UserId) -> Result<PlaybackInfo> {
        self.manager.get_playback(child_id, caller, true).await
    }
}

/// Holds both variants and dispatches on the request's mode
#[derive(Debug, Clone)]
pub struct Provisioner {
    webrtc: WebrtcProvisioner,
    rtmps: RtmpsProvisioner,
}

impl Provisioner {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            webrtc: WebrtcProvisioner::new(Arc::clone(&manager)),
            rtmps: RtmpsProvisioner::new(manager),
        }
    }

    #[must_use]
    pub fn for_mode(&self, mode: ProvisionMode) -> &dyn ProvisionStrategy {
        match mode {
            ProvisionMode::Webrtc => &self.webrtc,
            ProvisionMode::Rtmps => &self.rtmps,
        }
    }

    #[must_use]
    pub fn for_playback(&self, mode: PlaybackMode) -> &dyn ProvisionStrategy {
        match mode {
            PlaybackMode::Webrtc => &self.webrtc,
            PlaybackMode::Hls => &self.rtmps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(ProvisionMode::parse("webrtc").unwrap(), ProvisionMode::Webrtc);
        assert_eq!(ProvisionMode::parse("rtmps").unwrap(), ProvisionMode::Rtmps);
        assert!(ProvisionMode::parse("hls").is_err());

        assert_eq!(PlaybackMode::parse("hls").unwrap(), PlaybackMode::Hls);
        assert!(PlaybackMode::parse("rtmps").is_err());
    }
}
