//! Player data documents: ban list, presence, economy, tags and notifications.
//!
//! Each player is one JSON document. `pull`/`push` move whole documents; the
//! presence and daily-reward updates read and write the document while
//! holding the connection lock, so they cannot interleave with each other.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{with_conn, DbPool};
use crate::error::StoreError;

/// Seconds between two daily reward redemptions.
pub const DAILY_REWARD_WINDOW_SECS: i64 = 24 * 60 * 60;

/// A timed ban. `end_ts` is in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "endTS")]
    pub end_ts: i64,
}

impl Ban {
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.end_ts > now_ms
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(default)]
    pub online: bool,
    /// Unix seconds of the last online/offline transition.
    #[serde(default)]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Economy {
    #[serde(default)]
    pub currency: i64,
    /// Unix seconds of the last daily reward redemption.
    #[serde(default)]
    pub last_daily_redeem: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub username: String,
    #[serde(default)]
    pub bans: Vec<Ban>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub economy: Economy,
    #[serde(default)]
    pub notifications: Vec<serde_json::Value>,
}

impl PlayerRecord {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }

    /// First ban still in force at `now_ms`, if any.
    pub fn active_ban(&self, now_ms: i64) -> Option<&Ban> {
        self.bans.iter().find(|b| b.is_active(now_ms))
    }
}

/// Outcome of a daily reward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyReward {
    Granted { amount: i64, balance: i64 },
    AlreadyRedeemed { next_eligible_at: i64 },
}

fn load(conn: &Connection, user_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM players WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
        .transpose()
}

fn save(conn: &Connection, user_id: &str, record: &PlayerRecord) -> Result<(), StoreError> {
    let data = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO players (id, data, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![user_id, data, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[derive(Clone)]
pub struct PlayerStore {
    db: DbPool,
}

impl PlayerStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn pull(&self, user_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        let user_id = user_id.to_string();
        with_conn(&self.db, move |conn| load(conn, &user_id)).await
    }

    pub async fn push(&self, user_id: &str, record: &PlayerRecord) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let record = record.clone();
        with_conn(&self.db, move |conn| save(conn, &user_id, &record)).await
    }

    /// Flip the presence flag. Missing players are left untouched.
    pub async fn set_presence(&self, user_id: &str, online: bool) -> Result<(), StoreError> {
        let user_id = user_id.to_string();

        with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            if let Some(mut record) = load(&tx, &user_id)? {
                record.presence.online = online;
                record.presence.last_seen = Some(Utc::now().timestamp());
                save(&tx, &user_id, &record)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Append a ban to the player's record. Returns false if the player does
    /// not exist.
    pub async fn add_ban(&self, user_id: &str, ban: Ban) -> Result<bool, StoreError> {
        let user_id = user_id.to_string();

        with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let Some(mut record) = load(&tx, &user_id)? else {
                return Ok(false);
            };
            record.bans.push(ban);
            save(&tx, &user_id, &record)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    /// Grant `amount` currency if at least 24h have passed since the last
    /// redemption, stamping `now` as the new redemption time.
    ///
    /// The check and the update happen in one transaction under the
    /// connection lock, so a burst of reconnects grants at most once.
    pub async fn redeem_daily_reward(
        &self,
        user_id: &str,
        now: i64,
        amount: i64,
    ) -> Result<Option<DailyReward>, StoreError> {
        let user_id = user_id.to_string();

        with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let Some(mut record) = load(&tx, &user_id)? else {
                return Ok(None);
            };

            if let Some(last) = record.economy.last_daily_redeem {
                if now - last < DAILY_REWARD_WINDOW_SECS {
                    return Ok(Some(DailyReward::AlreadyRedeemed {
                        next_eligible_at: last + DAILY_REWARD_WINDOW_SECS,
                    }));
                }
            }

            record.economy.currency += amount;
            record.economy.last_daily_redeem = Some(now);
            let balance = record.economy.currency;
            save(&tx, &user_id, &record)?;
            tx.commit()?;

            Ok(Some(DailyReward::Granted { amount, balance }))
        })
        .await
    }
}
