//! Room configuration, owned by an external authoring tool and read-only here.

pub mod permissions;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::{with_conn, DbPool};
use crate::error::StoreError;
use crate::matchmaking::instance::MatchmakingMode;

pub use permissions::{Capabilities, EVERYONE_TIER};

/// A room variant carrying capacity and matchmaking policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subroom {
    pub max_players: u32,
    pub matchmaking_mode: MatchmakingMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
    /// user id -> permission tier
    #[serde(default)]
    pub permissions: HashMap<String, String>,
    /// permission tier -> capability flags
    #[serde(default)]
    pub permission_table: HashMap<String, Capabilities>,
    #[serde(default)]
    pub subrooms: Vec<Subroom>,
}

impl RoomMetadata {
    /// The subroom instances are sized from.
    pub fn primary_subroom(&self) -> Option<&Subroom> {
        self.subrooms.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub metadata: RoomMetadata,
}

/// Read access to room metadata.
#[derive(Clone)]
pub struct RoomStore {
    db: DbPool,
}

impl RoomStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let room_id = room_id.to_string();

        with_conn(&self.db, move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT id, name, metadata FROM rooms WHERE id = ?1",
                    params![room_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            row.map(|(id, name, metadata)| {
                Ok(Room {
                    id,
                    name,
                    metadata: serde_json::from_str(&metadata)?,
                })
            })
            .transpose()
        })
        .await
    }

    /// Insert or overwrite a room. Room authoring lives elsewhere; this is the
    /// seeding path used at setup and in tests.
    pub async fn put(&self, room: &Room) -> Result<(), StoreError> {
        let id = room.id.clone();
        let name = room.name.clone();
        let metadata = serde_json::to_string(&room.metadata)?;

        with_conn(&self.db, move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO rooms (id, name, metadata) VALUES (?1, ?2, ?3)",
                params![id, name, metadata],
            )?;
            Ok(())
        })
        .await
    }
}
