// ── Engine: Tier storage contracts ─────────────────────────────────────────
// All three tiers speak the same get/put/delete contract; only capacity,
// eviction, and latency differ. A backend that cannot be reached returns
// `CoreError::TierUnavailable` — never `Ok(None)` — so the memory manager can
// tell a miss from a degraded tier.

pub mod cold;
pub mod hot;
pub mod warm;

pub use cold::FsColdStore;
pub use hot::MemoryHotStore;
pub use warm::SqliteWarmStore;

use crate::atoms::error::CoreResult;
use crate::atoms::types::{Entry, Tier};
use async_trait::async_trait;
use std::time::Duration;

/// Uniform key/value contract implemented by every tier backend.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Which tier this backend is.
    fn tier(&self) -> Tier;

    /// `Ok(None)` is a miss. Unreachable backends return `TierUnavailable`.
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    /// Idempotent overwrite.
    async fn put(&self, key: &str, value: &[u8]) -> CoreResult<()>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// The copy this tier holds plus its metadata, or `None`. An advisory
    /// read — it does not refresh recency.
    async fn describe(&self, key: &str) -> CoreResult<Option<Entry>>;
}

/// What a hot-tier lookup saw. A tombstone shadows the slower tiers until
/// the asynchronous deletes confirm, so it must be distinguishable from a
/// plain miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotLookup {
    Hit(Vec<u8>),
    Tombstone,
    Miss,
}

/// Extra surface only the hot tier carries: TTL writes, tombstones, LRU
/// pressure relief, and the sweeper's migration listing.
#[async_trait]
pub trait HotTier: TierStore {
    /// Lookup that refreshes `last_accessed_at` and reports tombstones.
    async fn lookup(&self, key: &str) -> CoreResult<HotLookup>;

    /// Put with an optional per-entry TTL.
    async fn put_with_ttl(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CoreResult<()>;

    /// Write a short-lived tombstone that shadows lower tiers.
    async fn put_tombstone(&self, key: &str) -> CoreResult<()>;

    /// Entries older than `older_than` that have not been migrated yet,
    /// up to `limit`. Returns (key, value) pairs.
    async fn list_eligible_for_migration(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> CoreResult<Vec<(String, Vec<u8>)>>;

    /// Record that the sweeper copied this entry to warm. A later `put` for
    /// the same key clears the mark, making it eligible again.
    async fn mark_migrated(&self, key: &str) -> CoreResult<()>;

    /// Drop expired entries and apply LRU pressure until under capacity.
    /// Returns the number of entries removed.
    async fn evict(&self) -> CoreResult<usize>;
}
