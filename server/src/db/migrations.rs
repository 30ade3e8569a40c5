use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: matchmaking instances

CREATE TABLE instances (
    instance_id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    join_code TEXT NOT NULL UNIQUE,
    mode TEXT NOT NULL,
    max_players INTEGER NOT NULL,
    players TEXT NOT NULL DEFAULT '[]',
    player_count INTEGER NOT NULL DEFAULT 0,
    ttl_secs INTEGER NOT NULL,
    persistent INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    emptied_at INTEGER
);

CREATE INDEX idx_instances_room ON instances(room_id, created_at);
",
        ),
        M::up(
            "-- Migration 2: collaborator documents (rooms, players)

CREATE TABLE rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    metadata TEXT NOT NULL
);

CREATE TABLE players (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
",
        ),
        M::up(
            "-- Migration 3: audit log

CREATE TABLE audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);
",
        ),
    ])
}
