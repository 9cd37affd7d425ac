// ── Engine: Warm tier ──────────────────────────────────────────────────────
// Shared persistent store on SQLite via rusqlite. Larger than hot, no hard
// TTL; entries arrive by migration or by the manager's best-effort async
// writes. Runtime failures surface as TierUnavailable so the manager can
// skip this tier instead of reporting a miss.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{Entry, Tier};
use crate::engine::tiers::TierStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Thread-safe SQLite wrapper for the warm tier.
pub struct SqliteWarmStore {
    conn: Mutex<Connection>,
}

impl SqliteWarmStore {
    /// Open (or create) the warm database and initialize its table.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        info!("[warm] Opening warm store at {:?}", path);
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database for tests and ephemeral deployments.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CoreResult<Self> {
        // WAL for better concurrent read behavior
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(SqliteWarmStore { conn: Mutex::new(conn) })
    }

    fn unavailable(e: rusqlite::Error) -> CoreError {
        CoreError::tier_unavailable(Tier::Warm, e.to_string())
    }

    /// Number of stored entries (test/stats helper).
    pub fn len(&self) -> CoreResult<u64> {
        let conn = self.conn.lock();
        let n: u64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
            .map_err(Self::unavailable)?;
        Ok(n)
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl TierStore for SqliteWarmStore {
    fn tier(&self) -> Tier {
        Tier::Warm
    }

    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let row: Option<Vec<u8>> = conn
            .query_row("SELECT value FROM entries WHERE key = ?1", params![key], |r| r.get(0))
            .optional()
            .map_err(Self::unavailable)?;
        Ok(row)
    }

    async fn put(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entries (key, value, size, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                size = excluded.size,
                updated_at = excluded.updated_at",
            params![key, value, value.len() as i64, now],
        )
        .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entries WHERE key = ?1", params![key])
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn describe(&self, key: &str) -> CoreResult<Option<Entry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT value, created_at, updated_at FROM entries WHERE key = ?1",
                params![key],
                |r| {
                    Ok((
                        r.get::<_, Vec<u8>>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(Self::unavailable)?;
        Ok(row.map(|(value, created, updated)| Entry {
            key: key.to_string(),
            size_bytes: value.len() as u64,
            tier: Tier::Warm,
            created_at: parse_stamp(&created),
            last_accessed_at: parse_stamp(&updated),
            value,
        }))
    }
}

/// Rows written by `put` carry RFC-3339 stamps; anything else reads as now.
fn parse_stamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
