//! Height-gated persistent queue of fee-bumped sweep transactions,
//! backed by SQLite.
//!
//! Rows are immutable once inserted: an entry is created when a sweep is
//! bumped and deleted when it confirms (or, under the on-submit policy,
//! when it is first broadcast). There are no in-place updates, so a crash
//! between any two steps leaves either the old row or no row.

use tokio_rusqlite::{params, Connection};

use crate::Result;

/// A queued sweep: the fully signed raw transaction and the height at
/// which it becomes broadcastable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub raw_tx: Vec<u8>,
    pub unlock_height: u64,
}

#[derive(Clone)]
pub struct SweepQueue {
    conn: Connection,
}

impl SweepQueue {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Create the schema if it does not exist. Safe to call on every start.
    pub async fn setup(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS sweep_txs (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        reserve_id TEXT NOT NULL,
                        round_id TEXT NOT NULL,
                        raw_tx BLOB NOT NULL,
                        unlock_height INTEGER NOT NULL,
                        created_at INTEGER NOT NULL,
                        UNIQUE(reserve_id, round_id)
                    );
                    CREATE INDEX IF NOT EXISTS idx_sweep_txs_unlock_height
                        ON sweep_txs(unlock_height);",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a bumped sweep. Returns `false` when an entry for the same
    /// `(reserve_id, round_id)` authorization already exists, which makes
    /// redelivered bridge events harmless.
    pub async fn insert(
        &self,
        entry: &QueueEntry,
        reserve_id: &str,
        round_id: &str,
    ) -> Result<bool> {
        let raw_tx = entry.raw_tx.clone();
        let unlock_height = entry.unlock_height as i64;
        let reserve_id = reserve_id.to_string();
        let round_id = round_id.to_string();
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let rows = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "INSERT OR IGNORE INTO sweep_txs
                        (reserve_id, round_id, raw_tx, unlock_height, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![reserve_id, round_id, raw_tx, unlock_height, created_at],
                )?;
                Ok(rows)
            })
            .await?;
        Ok(rows > 0)
    }

    /// Entries whose unlock height has been reached at `current_height`.
    pub async fn select_ready(&self, current_height: u64) -> Result<Vec<QueueEntry>> {
        let current_height = current_height as i64;
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT raw_tx, unlock_height FROM sweep_txs
                        WHERE unlock_height <= ?1 ORDER BY unlock_height, id",
                )?;
                let rows = stmt
                    .query_map(params![current_height], |row| {
                        Ok(QueueEntry {
                            raw_tx: row.get(0)?,
                            unlock_height: row.get::<_, i64>(1)? as u64,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(entries)
    }

    /// Every queued entry, gated or not. The confirmation monitor tracks
    /// all of them.
    pub async fn select_all(&self) -> Result<Vec<QueueEntry>> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT raw_tx, unlock_height FROM sweep_txs ORDER BY unlock_height, id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(QueueEntry {
                            raw_tx: row.get(0)?,
                            unlock_height: row.get::<_, i64>(1)? as u64,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(entries)
    }

    /// Delete by raw transaction bytes. Idempotent: deleting a row that is
    /// already gone succeeds.
    pub async fn delete(&self, raw_tx: &[u8]) -> Result<()> {
        let raw_tx = raw_tx.to_vec();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM sweep_txs WHERE raw_tx = ?1", params![raw_tx])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
