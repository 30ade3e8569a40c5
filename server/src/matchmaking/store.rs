//! SQLite-backed instance store.
//!
//! Every instance row carries a `revision`. `replace` is a full-document write
//! that only lands if the stored revision still matches the one the caller
//! read, which is what keeps concurrent joins from overwriting each other.

use chrono::Utc;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{with_conn, DbPool};
use crate::error::StoreError;
use crate::matchmaking::instance::{Instance, MatchmakingMode};

/// Room id that lists instances across every room.
pub const ALL_ROOMS: &str = "*";

const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_ATTEMPTS: usize = 8;

const SELECT_COLUMNS: &str = "room_id, instance_id, join_code, mode, max_players, players, \
     created_at, ttl_secs, persistent, emptied_at, revision";

/// Generate a short upper-case alphanumeric join code.
fn generate_join_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

struct RawInstance {
    room_id: String,
    instance_id: String,
    join_code: String,
    mode: String,
    max_players: u32,
    players: String,
    created_at: i64,
    ttl_secs: i64,
    persistent: bool,
    emptied_at: Option<i64>,
    revision: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawInstance> {
    Ok(RawInstance {
        room_id: row.get(0)?,
        instance_id: row.get(1)?,
        join_code: row.get(2)?,
        mode: row.get(3)?,
        max_players: row.get(4)?,
        players: row.get(5)?,
        created_at: row.get(6)?,
        ttl_secs: row.get(7)?,
        persistent: row.get(8)?,
        emptied_at: row.get(9)?,
        revision: row.get(10)?,
    })
}

impl TryFrom<RawInstance> for Instance {
    type Error = StoreError;

    fn try_from(raw: RawInstance) -> Result<Self, Self::Error> {
        let mode = MatchmakingMode::parse(&raw.mode)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown mode '{}'", raw.mode)))?;
        Ok(Instance {
            room_id: raw.room_id,
            instance_id: raw.instance_id,
            join_code: raw.join_code,
            mode,
            max_players: raw.max_players,
            players: serde_json::from_str(&raw.players)?,
            created_at: raw.created_at,
            ttl_secs: raw.ttl_secs.max(0) as u64,
            persistent: raw.persistent,
            emptied_at: raw.emptied_at,
            revision: raw.revision,
        })
    }
}

fn query_instances(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Instance>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params, read_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(Instance::try_from).collect()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Persisted collection of matchmaking instances.
#[derive(Clone)]
pub struct InstanceStore {
    db: DbPool,
}

impl InstanceStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create an empty instance with a fresh id and a unique join code.
    pub async fn create(
        &self,
        room_id: &str,
        mode: MatchmakingMode,
        ttl_secs: u64,
        persistent: bool,
        max_players: u32,
    ) -> Result<Instance, StoreError> {
        self.create_with_roster(room_id, mode, ttl_secs, persistent, max_players, Vec::new())
            .await
    }

    /// Create an instance whose roster is written in the same insert, so no
    /// other writer can see it before `players` are in it.
    pub async fn create_with_roster(
        &self,
        room_id: &str,
        mode: MatchmakingMode,
        ttl_secs: u64,
        persistent: bool,
        max_players: u32,
        players: Vec<String>,
    ) -> Result<Instance, StoreError> {
        let room_id = room_id.to_string();

        with_conn(&self.db, move |conn| {
            let now = Utc::now().timestamp();
            let instance_id = Uuid::now_v7().to_string();
            let roster = serde_json::to_string(&players)?;
            let emptied_at = players.is_empty().then_some(now);

            for _ in 0..JOIN_CODE_ATTEMPTS {
                let join_code = generate_join_code();
                let inserted = conn.execute(
                    "INSERT INTO instances (instance_id, room_id, join_code, mode, max_players, players, player_count, ttl_secs, persistent, revision, created_at, emptied_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)",
                    params![
                        instance_id,
                        room_id,
                        join_code,
                        mode.as_str(),
                        max_players,
                        roster,
                        players.len() as i64,
                        ttl_secs as i64,
                        persistent,
                        now,
                        emptied_at
                    ],
                );

                match inserted {
                    Ok(_) => {
                        return Ok(Instance {
                            room_id,
                            instance_id,
                            join_code,
                            mode,
                            max_players,
                            players,
                            created_at: now,
                            ttl_secs,
                            persistent,
                            emptied_at,
                            revision: 0,
                        });
                    }
                    Err(e) if is_unique_violation(&e) => {
                        tracing::debug!(join_code = %join_code, "Join code collision, retrying");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Err(StoreError::JoinCodeExhausted)
        })
        .await
    }

    pub async fn get(&self, room_id: &str, instance_id: &str) -> Result<Option<Instance>, StoreError> {
        let room_id = room_id.to_string();
        let instance_id = instance_id.to_string();

        with_conn(&self.db, move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM instances WHERE room_id = ?1 AND instance_id = ?2"
                    ),
                    params![room_id, instance_id],
                    read_row,
                )
                .optional()?;
            raw.map(Instance::try_from).transpose()
        })
        .await
    }

    pub async fn get_by_join_code(
        &self,
        room_id: &str,
        join_code: &str,
    ) -> Result<Option<Instance>, StoreError> {
        let room_id = room_id.to_string();
        let join_code = join_code.to_string();

        with_conn(&self.db, move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM instances WHERE room_id = ?1 AND join_code = ?2"
                    ),
                    params![room_id, join_code],
                    read_row,
                )
                .optional()?;
            raw.map(Instance::try_from).transpose()
        })
        .await
    }

    /// List a room's instances in creation order. `ALL_ROOMS` lists every room.
    pub async fn list(&self, room_id: &str) -> Result<Vec<Instance>, StoreError> {
        let room_id = room_id.to_string();

        with_conn(&self.db, move |conn| {
            if room_id == ALL_ROOMS {
                query_instances(
                    conn,
                    &format!("SELECT {SELECT_COLUMNS} FROM instances ORDER BY created_at, rowid"),
                    [],
                )
            } else {
                query_instances(
                    conn,
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM instances WHERE room_id = ?1 ORDER BY created_at, rowid"
                    ),
                    params![room_id],
                )
            }
        })
        .await
    }

    /// Write a full instance snapshot.
    ///
    /// Succeeds only if the stored revision equals `instance.revision`; the
    /// returned snapshot carries the new revision. A mismatch (or a row that
    /// has been reaped meanwhile) yields `StoreError::RevisionConflict`.
    pub async fn replace(
        &self,
        room_id: &str,
        instance_id: &str,
        instance: &Instance,
    ) -> Result<Instance, StoreError> {
        let room_id = room_id.to_string();
        let instance_id = instance_id.to_string();
        let mut next = instance.clone();
        let players = serde_json::to_string(&instance.players)?;

        with_conn(&self.db, move |conn| {
            let updated = conn.execute(
                "UPDATE instances
                 SET mode = ?1, max_players = ?2, players = ?3, player_count = ?4, ttl_secs = ?5,
                     persistent = ?6, emptied_at = ?7, revision = revision + 1
                 WHERE room_id = ?8 AND instance_id = ?9 AND revision = ?10",
                params![
                    next.mode.as_str(),
                    next.max_players,
                    players,
                    next.players.len() as i64,
                    next.ttl_secs as i64,
                    next.persistent,
                    next.emptied_at,
                    room_id,
                    instance_id,
                    next.revision
                ],
            )?;

            if updated == 0 {
                return Err(StoreError::RevisionConflict);
            }
            next.revision += 1;
            Ok(next)
        })
        .await
    }

    /// Delete non-persistent instances that have been empty for longer than
    /// their TTL. Returns the number of instances reclaimed.
    pub async fn reap_expired(&self, now: i64) -> Result<usize, StoreError> {
        with_conn(&self.db, move |conn| {
            let removed = conn.execute(
                "DELETE FROM instances
                 WHERE persistent = 0 AND player_count = 0
                   AND emptied_at IS NOT NULL AND emptied_at + ttl_secs <= ?1",
                params![now],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Number of instances, across all rooms, holding at least one player.
    pub async fn occupied_count(&self) -> Result<usize, StoreError> {
        let instances = self.list(ALL_ROOMS).await?;
        Ok(instances.iter().filter(|i| !i.players.is_empty()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn store() -> InstanceStore {
        InstanceStore::new(init_memory_db().expect("in-memory db"))
    }

    #[test]
    fn test_join_code_shape() {
        let code = generate_join_code();
        assert_eq!(code.len(), JOIN_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = store();
        let inst = store
            .create("room-a", MatchmakingMode::Public, 300, false, 8)
            .await
            .unwrap();

        let by_id = store.get("room-a", &inst.instance_id).await.unwrap();
        assert_eq!(by_id.as_ref(), Some(&inst));

        let by_code = store.get_by_join_code("room-a", &inst.join_code).await.unwrap();
        assert_eq!(by_code, Some(inst.clone()));

        // Lookups are scoped to the room
        assert!(store.get("room-b", &inst.instance_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_scopes_and_wildcard() {
        let store = store();
        store.create("room-a", MatchmakingMode::Public, 300, false, 8).await.unwrap();
        store.create("room-a", MatchmakingMode::Private, 300, false, 8).await.unwrap();
        store.create("room-b", MatchmakingMode::Public, 300, false, 8).await.unwrap();

        assert_eq!(store.list("room-a").await.unwrap().len(), 2);
        assert_eq!(store.list("room-b").await.unwrap().len(), 1);
        assert_eq!(store.list(ALL_ROOMS).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_replace_rejects_stale_revision() {
        let store = store();
        let inst = store
            .create("room-a", MatchmakingMode::Public, 300, false, 8)
            .await
            .unwrap();

        let mut first = inst.clone();
        first.add_player("u1").unwrap();
        let written = store.replace("room-a", &inst.instance_id, &first).await.unwrap();
        assert_eq!(written.revision, 1);

        // A second writer that read revision 0 must lose
        let mut second = inst.clone();
        second.add_player("u2").unwrap();
        let err = store
            .replace("room-a", &inst.instance_id, &second)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RevisionConflict));

        let stored = store.get("room-a", &inst.instance_id).await.unwrap().unwrap();
        assert_eq!(stored.players, vec!["u1"]);
    }

    #[tokio::test]
    async fn test_create_with_roster_is_occupied_from_the_start() {
        let store = store();
        let inst = store
            .create_with_roster("r", MatchmakingMode::Private, 10, false, 2, vec!["u1".into()])
            .await
            .unwrap();
        assert_eq!(inst.players, vec!["u1"]);
        assert_eq!(inst.emptied_at, None);

        let stored = store.get("r", &inst.instance_id).await.unwrap().unwrap();
        assert_eq!(stored, inst);
        assert_eq!(store.occupied_count().await.unwrap(), 1);
        assert_eq!(store.reap_expired(inst.created_at + 60).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reap_expired_skips_occupied_and_persistent() {
        let store = store();
        let empty = store.create("r", MatchmakingMode::Public, 10, false, 4).await.unwrap();
        let pinned = store.create("r", MatchmakingMode::Public, 10, true, 4).await.unwrap();
        let busy = store.create("r", MatchmakingMode::Public, 10, false, 4).await.unwrap();

        let mut occupied = busy.clone();
        occupied.add_player("u1").unwrap();
        store.replace("r", &busy.instance_id, &occupied).await.unwrap();

        // Not yet past the TTL
        assert_eq!(store.reap_expired(empty.created_at + 5).await.unwrap(), 0);

        let removed = store.reap_expired(empty.created_at + 11).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("r", &empty.instance_id).await.unwrap().is_none());
        assert!(store.get("r", &pinned.instance_id).await.unwrap().is_some());
        assert!(store.get("r", &busy.instance_id).await.unwrap().is_some());
        assert_eq!(store.occupied_count().await.unwrap(), 1);
    }
}
