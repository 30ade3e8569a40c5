use serde::{Deserialize, Serialize};

use crate::rooms::RoomMetadata;

/// Tier used for any user without an explicit entry in `permissions`.
pub const EVERYONE_TIER: &str = "everyone";

/// Capability flags attached to a permission tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub join: bool,
}

/// Resolve the permission tier of a user in a room.
pub fn tier_for<'a>(metadata: &'a RoomMetadata, user_id: &str) -> &'a str {
    metadata
        .permissions
        .get(user_id)
        .map(String::as_str)
        .unwrap_or(EVERYONE_TIER)
}

/// Capabilities of a user in a room. A tier missing from the table grants nothing.
pub fn capabilities_for(metadata: &RoomMetadata, user_id: &str) -> Capabilities {
    let tier = tier_for(metadata, user_id);
    metadata
        .permission_table
        .get(tier)
        .copied()
        .unwrap_or_default()
}

pub fn can_join(metadata: &RoomMetadata, user_id: &str) -> bool {
    capabilities_for(metadata, user_id).join
}
