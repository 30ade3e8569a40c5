//! Append-only audit trail of lifecycle events, mirrored to `tracing` under
//! the `audit` target.

use chrono::Utc;
use rusqlite::params;

use crate::db::{with_conn, DbPool};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: i64,
    pub message: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct AuditLog {
    db: DbPool,
}

impl AuditLog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Record an event. A failed write is logged and otherwise ignored.
    pub async fn record(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "audit", "{}", message);

        let result = with_conn(&self.db, move |conn| {
            conn.execute(
                "INSERT INTO audit_log (message, created_at) VALUES (?1, ?2)",
                params![message, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist audit entry");
        }
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        with_conn(&self.db, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message, created_at FROM audit_log ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(AuditEntry {
                        id: row.get(0)?,
                        message: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Capture panics from any task into the audit log. The previous hook
    /// still runs.
    pub fn install_panic_hook(&self) {
        let db = self.db.clone();
        let previous = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let message = format!("Panic: {info}");
            tracing::error!(target: "audit", "{}", message);

            // try_lock: the panicking thread may already hold the connection.
            if let Ok(conn) = db.try_lock() {
                let _ = conn.execute(
                    "INSERT INTO audit_log (message, created_at) VALUES (?1, ?2)",
                    params![message, Utc::now().to_rfc3339()],
                );
            }

            previous(info);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let audit = AuditLog::new(init_memory_db().unwrap());
        audit.record("Server started").await;
        audit.record("User 1 connected").await;

        let entries = audit.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "User 1 connected");
        assert_eq!(entries[1].message, "Server started");
    }
}
