pub mod audit;
pub mod credentials;
pub mod playback_token;
pub mod provision;
pub mod session;
pub mod stage_pool;
pub mod stream_key;

pub use audit::{AuditAction, AuditEntry, AuditResourceType, AuditService};
pub use credentials::CredentialIssuer;
pub use playback_token::PlaybackTokenService;
pub use provision::{
    IngestDetails, PlaybackMode, ProvisionMode, ProvisionStrategy, Provisioner, RtmpsProvisioner,
    WebrtcProvisioner,
};
pub use session::{
    LivenessStatus, PlaybackCredentials, PlaybackInfo, RealtimeIngest, RtmpsIngest,
    SessionManager, SessionManagerDeps, StartedSession,
};
pub use stage_pool::StagePool;
pub use stream_key::StreamKeyCipher;
