use serde::{Deserialize, Serialize};

use super::id::{ChildId, UserId};

/// Child profile row, owned by the relational store collaborator.
///
/// The core reads it only to authorize provisioning and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildProfile {
    pub id: ChildId,
    pub owner_user_id: UserId,
    pub streaming_enabled: bool,
}

impl ChildProfile {
    #[must_use]
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.owner_user_id == user_id
    }
}
