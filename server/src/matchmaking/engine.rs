//! Instance allocation: create, auto-join, join-specific, leave and list.
//!
//! Instance rosters are updated read-modify-write against the store. Every
//! write is compare-and-swapped on the instance revision and retried on
//! conflict, so two concurrent joins can never both land on the last slot.

use chrono::Utc;
use std::cmp::Reverse;

use crate::error::{MatchmakingError, StoreError};
use crate::matchmaking::instance::{
    Instance, InstanceSummary, MatchmakingMode, Placement, SessionLocation,
};
use crate::matchmaking::store::InstanceStore;
use crate::rooms::{permissions, Room, RoomStore, Subroom};

/// Tunables for the engine, loaded from the `[matchmaking]` config section.
#[derive(Debug, Clone)]
pub struct MatchmakingSettings {
    /// TTL given to new instances; empty instances are reaped after it.
    pub instance_ttl_secs: u64,
    /// How many times a conflicting roster write is retried.
    pub max_update_retries: usize,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            instance_ttl_secs: 300,
            max_update_retries: 16,
        }
    }
}

#[derive(Clone)]
pub struct Matchmaker {
    instances: InstanceStore,
    rooms: RoomStore,
    settings: MatchmakingSettings,
}

impl Matchmaker {
    pub fn new(instances: InstanceStore, rooms: RoomStore, settings: MatchmakingSettings) -> Self {
        Self {
            instances,
            rooms,
            settings,
        }
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    /// CREATE-PRIVATE: new Private instance sized from the primary subroom.
    pub async fn create_private(
        &self,
        user_id: &str,
        room_id: &str,
        location: &mut Option<SessionLocation>,
    ) -> Result<Placement, MatchmakingError> {
        let room = self.authorized_room(room_id, user_id).await?;
        let max_players = primary_subroom(&room)?.max_players;
        self.create_and_join(user_id, &room, MatchmakingMode::Private, max_players, location)
            .await
    }

    /// CREATE-PUBLIC: like CREATE-PRIVATE but requires a Public primary subroom.
    pub async fn create_public(
        &self,
        user_id: &str,
        room_id: &str,
        location: &mut Option<SessionLocation>,
    ) -> Result<Placement, MatchmakingError> {
        let room = self.authorized_room(room_id, user_id).await?;
        self.create_public_in(user_id, &room, location).await
    }

    async fn create_public_in(
        &self,
        user_id: &str,
        room: &Room,
        location: &mut Option<SessionLocation>,
    ) -> Result<Placement, MatchmakingError> {
        let subroom = primary_subroom(room)?;
        if subroom.matchmaking_mode != MatchmakingMode::Public {
            return Err(MatchmakingError::PermissionDenied);
        }
        let max_players = subroom.max_players;
        self.create_and_join(user_id, room, MatchmakingMode::Public, max_players, location)
            .await
    }

    /// JOIN-PUBLIC: pack the fullest Public instance with a free slot, or
    /// create one when none exists.
    pub async fn join_public(
        &self,
        user_id: &str,
        room_id: &str,
        location: &mut Option<SessionLocation>,
    ) -> Result<Placement, MatchmakingError> {
        let room = self.authorized_room(room_id, user_id).await?;
        self.release(user_id, location).await?;

        for attempt in 0..self.settings.max_update_retries {
            let candidates = self.instances.list(room_id).await?;

            // min_by_key keeps the first of equal keys, so ties go to the
            // earliest-created instance.
            let best = candidates
                .into_iter()
                .filter(|i| i.mode == MatchmakingMode::Public && i.has_room_for_one())
                .min_by_key(|i| Reverse(i.players.len()));

            let Some(candidate) = best else {
                return self.create_public_in(user_id, &room, location).await;
            };

            let mut next = candidate.clone();
            if next.add_player(user_id).is_err() {
                continue;
            }

            match self
                .instances
                .replace(room_id, &candidate.instance_id, &next)
                .await
            {
                Ok(written) => {
                    *location = Some(written.location());
                    tracing::debug!(
                        user_id = %user_id,
                        instance_id = %written.instance_id,
                        players = written.players.len(),
                        "Joined public instance"
                    );
                    return Ok(Placement {
                        instance: written,
                        created: false,
                    });
                }
                Err(StoreError::RevisionConflict) => {
                    tracing::debug!(
                        user_id = %user_id,
                        instance_id = %candidate.instance_id,
                        attempt,
                        "Public join lost a race, reselecting"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::RevisionConflict.into())
    }

    /// JOIN-SPECIFIC: join an instance by id.
    pub async fn join_specific(
        &self,
        user_id: &str,
        room_id: &str,
        instance_id: &str,
        location: &mut Option<SessionLocation>,
    ) -> Result<Placement, MatchmakingError> {
        self.authorized_room(room_id, user_id).await?;

        let target = self
            .instances
            .get(room_id, instance_id)
            .await?
            .ok_or(MatchmakingError::InstanceNotFound)?;
        ensure_joinable(&target, user_id)?;

        if location.as_ref() == Some(&target.location()) && target.contains(user_id) {
            return Ok(Placement {
                instance: target,
                created: false,
            });
        }

        self.release(user_id, location).await?;

        let joined = self
            .update_instance(room_id, instance_id, |inst| {
                ensure_joinable(inst, user_id)?;
                inst.add_player(user_id)
            })
            .await?;

        *location = Some(joined.location());
        Ok(Placement {
            instance: joined,
            created: false,
        })
    }

    /// LEAVE: drop the player from the instance their session points at.
    pub async fn leave(
        &self,
        user_id: &str,
        location: &mut Option<SessionLocation>,
    ) -> Result<(), MatchmakingError> {
        if location.is_none() {
            return Err(MatchmakingError::NotInInstance);
        }
        self.release(user_id, location).await?;
        Ok(())
    }

    /// LIST-PUBLIC: summaries of the room's Public instances.
    pub async fn list_public(&self, room_id: &str) -> Result<Vec<InstanceSummary>, MatchmakingError> {
        if self.rooms.get(room_id).await?.is_none() {
            return Err(MatchmakingError::RoomNotFound);
        }

        let instances = self.instances.list(room_id).await?;
        Ok(instances
            .iter()
            .filter(|i| i.mode == MatchmakingMode::Public)
            .map(Instance::summary)
            .collect())
    }

    /// Remove the player from their current instance, if any, and clear the
    /// location. Returns whether a roster was changed. An instance that has
    /// disappeared in the meantime counts as already left.
    pub async fn release(
        &self,
        user_id: &str,
        location: &mut Option<SessionLocation>,
    ) -> Result<bool, MatchmakingError> {
        let Some(current) = location.take() else {
            return Ok(false);
        };

        let instance = match self
            .instances
            .get_by_join_code(&current.room_id, &current.join_code)
            .await
        {
            Ok(Some(instance)) => instance,
            Ok(None) => return Ok(false),
            Err(e) => {
                *location = Some(current);
                return Err(e.into());
            }
        };

        let now = Utc::now().timestamp();
        let result = self
            .update_instance(&current.room_id, &instance.instance_id, |inst| {
                inst.remove_player(user_id, now);
                Ok(())
            })
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    user_id = %user_id,
                    room_id = %current.room_id,
                    join_code = %current.join_code,
                    "Released instance membership"
                );
                Ok(true)
            }
            Err(MatchmakingError::InstanceNotFound) => Ok(false),
            Err(e) => {
                *location = Some(current);
                Err(e)
            }
        }
    }

    async fn create_and_join(
        &self,
        user_id: &str,
        room: &Room,
        mode: MatchmakingMode,
        max_players: u32,
        location: &mut Option<SessionLocation>,
    ) -> Result<Placement, MatchmakingError> {
        if max_players == 0 {
            tracing::warn!(room_id = %room.id, "Primary subroom allows no players");
            return Err(MatchmakingError::InstanceFull);
        }

        self.release(user_id, location).await?;

        let joined = self
            .instances
            .create_with_roster(
                &room.id,
                mode,
                self.settings.instance_ttl_secs,
                false,
                max_players,
                vec![user_id.to_string()],
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            room_id = %room.id,
            instance_id = %joined.instance_id,
            join_code = %joined.join_code,
            mode = mode.as_str(),
            max_players,
            "Created instance"
        );

        *location = Some(joined.location());
        Ok(Placement {
            instance: joined,
            created: true,
        })
    }

    /// Apply `mutate` to the latest snapshot and write it back, retrying when
    /// another writer got there first.
    async fn update_instance<F>(
        &self,
        room_id: &str,
        instance_id: &str,
        mutate: F,
    ) -> Result<Instance, MatchmakingError>
    where
        F: Fn(&mut Instance) -> Result<(), MatchmakingError>,
    {
        for _ in 0..self.settings.max_update_retries {
            let current = self
                .instances
                .get(room_id, instance_id)
                .await?
                .ok_or(MatchmakingError::InstanceNotFound)?;

            let mut next = current.clone();
            mutate(&mut next)?;
            if next == current {
                return Ok(current);
            }

            match self.instances.replace(room_id, instance_id, &next).await {
                Ok(written) => return Ok(written),
                Err(StoreError::RevisionConflict) => {
                    tracing::debug!(instance_id = %instance_id, "Revision conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::RevisionConflict.into())
    }

    async fn authorized_room(&self, room_id: &str, user_id: &str) -> Result<Room, MatchmakingError> {
        let room = self
            .rooms
            .get(room_id)
            .await?
            .ok_or(MatchmakingError::RoomNotFound)?;

        if !permissions::can_join(&room.metadata, user_id) {
            tracing::debug!(
                user_id = %user_id,
                room_id = %room_id,
                tier = permissions::tier_for(&room.metadata, user_id),
                "Join capability denied"
            );
            return Err(MatchmakingError::PermissionDenied);
        }
        Ok(room)
    }
}

fn primary_subroom(room: &Room) -> Result<&Subroom, MatchmakingError> {
    room.metadata.primary_subroom().ok_or_else(|| {
        tracing::warn!(room_id = %room.id, "Room has no subrooms configured");
        MatchmakingError::RoomNotFound
    })
}

fn ensure_joinable(instance: &Instance, user_id: &str) -> Result<(), MatchmakingError> {
    if instance.mode != MatchmakingMode::Public {
        return Err(MatchmakingError::InstanceNotJoinable);
    }
    if !instance.contains(user_id) && !instance.has_room_for_one() {
        return Err(MatchmakingError::InstanceFull);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;
    use crate::rooms::{Capabilities, RoomMetadata, EVERYONE_TIER};
    use std::collections::HashMap;

    async fn setup(max_players: u32, mode: MatchmakingMode) -> Matchmaker {
        let db = init_memory_db().unwrap();
        let rooms = RoomStore::new(db.clone());

        let mut permission_table = HashMap::new();
        permission_table.insert(EVERYONE_TIER.to_string(), Capabilities { join: true });
        permission_table.insert("muted".to_string(), Capabilities { join: false });
        let mut permissions = HashMap::new();
        permissions.insert("outcast".to_string(), "muted".to_string());

        rooms
            .put(&Room {
                id: "plaza".into(),
                name: "Plaza".into(),
                metadata: RoomMetadata {
                    permissions,
                    permission_table,
                    subrooms: vec![Subroom {
                        max_players,
                        matchmaking_mode: mode,
                    }],
                },
            })
            .await
            .unwrap();

        Matchmaker::new(InstanceStore::new(db), rooms, MatchmakingSettings::default())
    }

    #[tokio::test]
    async fn test_join_public_creates_when_room_empty() {
        let mm = setup(4, MatchmakingMode::Public).await;
        let mut loc = None;

        let placed = mm.join_public("u1", "plaza", &mut loc).await.unwrap();
        assert!(placed.created);
        assert_eq!(placed.instance.players, vec!["u1"]);
        assert_eq!(placed.instance.max_players, 4);
        assert_eq!(loc, Some(placed.instance.location()));
    }

    #[tokio::test]
    async fn test_join_public_packs_then_overflows() {
        let mm = setup(2, MatchmakingMode::Public).await;
        let (mut a, mut b, mut c) = (None, None, None);

        let first = mm.join_public("a", "plaza", &mut a).await.unwrap();
        let second = mm.join_public("b", "plaza", &mut b).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.instance.instance_id, first.instance.instance_id);

        let third = mm.join_public("c", "plaza", &mut c).await.unwrap();
        assert!(third.created);
        assert_ne!(third.instance.instance_id, first.instance.instance_id);
    }

    #[tokio::test]
    async fn test_join_public_prefers_fullest_instance() {
        let mm = setup(8, MatchmakingMode::Public).await;
        let mut a = None;
        let mut b = None;
        let mut c = None;
        mm.create_public("a", "plaza", &mut a).await.unwrap();
        let busy = mm.create_public("b", "plaza", &mut b).await.unwrap();
        mm.join_specific("c", "plaza", &busy.instance.instance_id, &mut c)
            .await
            .unwrap();

        let mut d = None;
        let placed = mm.join_public("d", "plaza", &mut d).await.unwrap();
        assert_eq!(placed.instance.instance_id, busy.instance.instance_id);
        assert_eq!(placed.instance.players.len(), 3);
    }

    #[tokio::test]
    async fn test_join_public_tie_goes_to_earliest_instance() {
        let mm = setup(8, MatchmakingMode::Public).await;
        let mut a = None;
        let mut b = None;
        let first = mm.create_public("a", "plaza", &mut a).await.unwrap();
        let second = mm.create_public("b", "plaza", &mut b).await.unwrap();
        assert_ne!(first.instance.instance_id, second.instance.instance_id);

        let mut c = None;
        let placed = mm.join_public("c", "plaza", &mut c).await.unwrap();
        assert!(!placed.created);
        assert_eq!(placed.instance.instance_id, first.instance.instance_id);
        assert_eq!(placed.instance.players, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_capacity_without_leaving_debris() {
        let mm = setup(0, MatchmakingMode::Public).await;
        let mut loc = None;
        assert!(matches!(
            mm.create_private("u1", "plaza", &mut loc).await,
            Err(MatchmakingError::InstanceFull)
        ));
        assert!(matches!(
            mm.join_public("u1", "plaza", &mut loc).await,
            Err(MatchmakingError::InstanceFull)
        ));
        assert!(loc.is_none());
        assert!(mm.instances().list("plaza").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_created_instance_already_holds_creator() {
        let mm = setup(1, MatchmakingMode::Public).await;
        let mut owner = None;
        let placed = mm.create_public("o", "plaza", &mut owner).await.unwrap();
        assert_eq!(placed.instance.revision, 0);
        assert_eq!(placed.instance.players, vec!["o"]);
        assert_eq!(placed.instance.emptied_at, None);

        // A one-slot instance is full the moment it exists.
        let mut guest = None;
        let other = mm.join_public("g", "plaza", &mut guest).await.unwrap();
        assert!(other.created);
        assert_ne!(other.instance.instance_id, placed.instance.instance_id);
    }

    #[tokio::test]
    async fn test_leave_twice_reports_not_in_instance() {
        let mm = setup(4, MatchmakingMode::Public).await;
        let mut loc = None;
        let placed = mm.join_public("u1", "plaza", &mut loc).await.unwrap();

        mm.leave("u1", &mut loc).await.unwrap();
        assert!(loc.is_none());
        let after = mm
            .instances()
            .get("plaza", &placed.instance.instance_id)
            .await
            .unwrap()
            .unwrap();
        assert!(after.players.is_empty());
        assert!(after.emptied_at.is_some());

        assert!(matches!(
            mm.leave("u1", &mut loc).await,
            Err(MatchmakingError::NotInInstance)
        ));
    }

    #[tokio::test]
    async fn test_permission_denied_for_tier_without_join() {
        let mm = setup(4, MatchmakingMode::Public).await;
        let mut loc = None;
        assert!(matches!(
            mm.join_public("outcast", "plaza", &mut loc).await,
            Err(MatchmakingError::PermissionDenied)
        ));
        assert!(matches!(
            mm.create_private("outcast", "plaza", &mut loc).await,
            Err(MatchmakingError::PermissionDenied)
        ));
        assert!(mm.instances().list("plaza").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let mm = setup(4, MatchmakingMode::Public).await;
        let mut loc = None;
        assert!(matches!(
            mm.join_public("u1", "nowhere", &mut loc).await,
            Err(MatchmakingError::RoomNotFound)
        ));
        assert!(matches!(
            mm.list_public("nowhere").await,
            Err(MatchmakingError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_public_requires_public_subroom() {
        let mm = setup(4, MatchmakingMode::Private).await;
        let mut loc = None;
        assert!(matches!(
            mm.create_public("u1", "plaza", &mut loc).await,
            Err(MatchmakingError::PermissionDenied)
        ));
        let private = mm.create_private("u1", "plaza", &mut loc).await.unwrap();
        assert_eq!(private.instance.mode, MatchmakingMode::Private);
    }

    #[tokio::test]
    async fn test_join_specific_failures() {
        let mm = setup(1, MatchmakingMode::Public).await;
        let mut owner = None;
        let mut guest = None;

        assert!(matches!(
            mm.join_specific("g", "plaza", "missing", &mut guest).await,
            Err(MatchmakingError::InstanceNotFound)
        ));

        let public = mm.create_public("o", "plaza", &mut owner).await.unwrap();
        assert!(matches!(
            mm.join_specific("g", "plaza", &public.instance.instance_id, &mut guest)
                .await,
            Err(MatchmakingError::InstanceFull)
        ));

        let private = mm.create_private("o", "plaza", &mut owner).await.unwrap();
        assert!(matches!(
            mm.join_specific("g", "plaza", &private.instance.instance_id, &mut guest)
                .await,
            Err(MatchmakingError::InstanceNotJoinable)
        ));
        assert!(guest.is_none());
    }

    #[tokio::test]
    async fn test_moving_leaves_previous_instance() {
        let mm = setup(4, MatchmakingMode::Public).await;
        let mut loc = None;
        let first = mm.create_public("u1", "plaza", &mut loc).await.unwrap();
        let second = mm.create_private("u1", "plaza", &mut loc).await.unwrap();

        let old = mm
            .instances()
            .get("plaza", &first.instance.instance_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!old.contains("u1"));
        assert_eq!(loc, Some(second.instance.location()));
    }

    #[tokio::test]
    async fn test_list_public_hides_private_instances() {
        let mm = setup(4, MatchmakingMode::Public).await;
        let (mut a, mut b) = (None, None);
        let public = mm.create_public("a", "plaza", &mut a).await.unwrap();
        mm.create_private("b", "plaza", &mut b).await.unwrap();

        let listed = mm.list_public("plaza").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].instance_id, public.instance.instance_id);
        assert_eq!(listed[0].matchmaking_mode, MatchmakingMode::Public);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_never_exceed_capacity() {
        let mm = setup(3, MatchmakingMode::Public).await;
        let mut seed = None;
        let target = mm.create_public("seed", "plaza", &mut seed).await.unwrap();
        let instance_id = target.instance.instance_id.clone();

        let mut handles = Vec::new();
        for i in 0..12 {
            let mm = mm.clone();
            let instance_id = instance_id.clone();
            handles.push(tokio::spawn(async move {
                let mut loc = None;
                mm.join_specific(&format!("p{i}"), "plaza", &instance_id, &mut loc)
                    .await
                    .is_ok()
            }));
        }

        let mut joined = 0;
        for handle in handles {
            if handle.await.unwrap() {
                joined += 1;
            }
        }

        let stored = mm.instances().get("plaza", &instance_id).await.unwrap().unwrap();
        assert_eq!(joined, 2);
        assert_eq!(stored.players.len(), 3);
    }
}
