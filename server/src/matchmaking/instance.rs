use serde::{Deserialize, Serialize};

use crate::error::MatchmakingError;

/// Visibility and joinability policy of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchmakingMode {
    /// Auto-matchable and listed.
    Public,
    /// Reachable only through its join code.
    Private,
    /// Not joinable at all.
    Locked,
}

impl MatchmakingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Private => "Private",
            Self::Locked => "Locked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Public" | "public" => Some(Self::Public),
            "Private" | "private" => Some(Self::Private),
            "Locked" | "locked" => Some(Self::Locked),
            _ => None,
        }
    }
}

/// A live session of a room.
///
/// `revision` is bumped by every successful store write and is what
/// `InstanceStore::replace` compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub room_id: String,
    pub instance_id: String,
    pub join_code: String,
    pub mode: MatchmakingMode,
    pub max_players: u32,
    pub players: Vec<String>,
    /// Unix seconds.
    pub created_at: i64,
    pub ttl_secs: u64,
    pub persistent: bool,
    /// Unix seconds at which the roster last became empty.
    pub emptied_at: Option<i64>,
    pub revision: i64,
}

impl Instance {
    pub fn has_room_for_one(&self) -> bool {
        self.players.len() < self.max_players as usize
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.players.iter().any(|p| p == user_id)
    }

    /// Add a player to the roster. Adding someone already present is a no-op.
    pub fn add_player(&mut self, user_id: &str) -> Result<(), MatchmakingError> {
        if self.contains(user_id) {
            return Ok(());
        }
        if !self.has_room_for_one() {
            return Err(MatchmakingError::InstanceFull);
        }
        self.players.push(user_id.to_string());
        self.emptied_at = None;
        Ok(())
    }

    /// Remove a player. Returns whether they were present.
    pub fn remove_player(&mut self, user_id: &str, now: i64) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p != user_id);
        let removed = self.players.len() < before;
        if removed && self.players.is_empty() {
            self.emptied_at = Some(now);
        }
        removed
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            room_id: self.room_id.clone(),
            instance_id: self.instance_id.clone(),
            join_code: self.join_code.clone(),
            matchmaking_mode: self.mode,
            max_players: self.max_players,
            player_count: self.players.len(),
            players: self.players.clone(),
            persistent: self.persistent,
        }
    }

    pub fn location(&self) -> SessionLocation {
        SessionLocation {
            room_id: self.room_id.clone(),
            join_code: self.join_code.clone(),
        }
    }
}

/// Serialized view of an instance sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceSummary {
    pub room_id: String,
    pub instance_id: String,
    pub join_code: String,
    pub matchmaking_mode: MatchmakingMode,
    pub max_players: u32,
    pub player_count: usize,
    pub players: Vec<String>,
    pub persistent: bool,
}

/// The single instance a connection currently occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLocation {
    pub room_id: String,
    pub join_code: String,
}

/// Where a create/join command put the player.
#[derive(Debug, Clone)]
pub struct Placement {
    pub instance: Instance,
    /// True when the instance was created by this request.
    pub created: bool,
}
