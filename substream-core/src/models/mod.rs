pub mod channel;
pub mod id;
pub mod media;
pub mod pagination;
pub mod profile;
pub mod session;
pub mod stage;

pub use channel::{Channel, ChannelStatus};
pub use id::{generate_id, ChannelId, ChildId, SessionId, StreamId, UserId};
pub use media::MediaConstraints;
pub use pagination::{decode_cursor, encode_cursor, PageInfo, PageRequest, SessionCursor};
pub use profile::ChildProfile;
pub use session::{SessionStatus, StreamSession};
pub use stage::{
    ParticipantCapability, ParticipantGrant, PooledStage, PoolStatus, StageAllocation,
    SubscribeAllocation,
};
