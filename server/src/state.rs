use crate::audit::AuditLog;
use crate::db::DbPool;
use crate::matchmaking::{InstanceStore, Matchmaker};
use crate::players::PlayerStore;
use crate::rooms::RoomStore;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::KeepAlive;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// HS256 key player tokens are verified with
    pub jwt_secret: Vec<u8>,
    /// Authenticated gateway connections, one per user
    pub connections: ConnectionRegistry,
    pub instances: InstanceStore,
    pub rooms: RoomStore,
    pub players: PlayerStore,
    pub matchmaker: Matchmaker,
    pub audit: AuditLog,
    /// Currency granted by the daily reward
    pub daily_reward: i64,
    /// Gateway ping cadence
    pub keepalive: KeepAlive,
}

impl AppState {
    pub fn new(
        db: DbPool,
        jwt_secret: Vec<u8>,
        matchmaking: crate::matchmaking::MatchmakingSettings,
        daily_reward: i64,
    ) -> Self {
        let instances = InstanceStore::new(db.clone());
        let rooms = RoomStore::new(db.clone());
        let matchmaker = Matchmaker::new(instances.clone(), rooms.clone(), matchmaking);

        Self {
            players: PlayerStore::new(db.clone()),
            audit: AuditLog::new(db),
            connections: ConnectionRegistry::new(),
            instances,
            rooms,
            matchmaker,
            jwt_secret,
            daily_reward,
            keepalive: KeepAlive::default(),
        }
    }
}
