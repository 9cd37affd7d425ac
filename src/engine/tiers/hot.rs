// ── Engine: Hot tier ───────────────────────────────────────────────────────
// In-process cache with byte capacity, LRU eviction, per-entry TTL, and
// delete tombstones. Monotonic stamps use tokio's clock so tests can drive
// time with `tokio::time::pause`.
//
// Thread-safety: one parking_lot mutex around the whole map. Operations are
// O(1) except eviction and the sweeper listing, which scan.

use crate::atoms::constants::TOMBSTONE_TTL_SECS;
use crate::atoms::error::CoreResult;
use crate::atoms::types::{Entry, Tier};
use crate::engine::tiers::{HotLookup, HotTier, TierStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct HotEntry {
    value: Vec<u8>,
    created_at: Instant,
    /// Monotone access sequence — higher means more recently used.
    access_seq: u64,
    expires_at: Option<Instant>,
    /// Tombstones shadow warm/cold after a delete; they hold no value.
    tombstone: bool,
    /// Set by the sweeper once the entry has a warm copy.
    migrated: bool,
    /// Wall-clock stamps for `describe`; age math stays on the monotonic clock.
    created_wall: DateTime<Utc>,
    accessed_wall: DateTime<Utc>,
}

impl HotEntry {
    fn size(&self) -> u64 {
        self.value.len() as u64
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

struct HotInner {
    entries: HashMap<String, HotEntry>,
    total_bytes: u64,
    access_counter: u64,
}

/// The hot tier. Cheap to clone via `Arc` at the call sites.
pub struct MemoryHotStore {
    inner: Mutex<HotInner>,
    capacity_bytes: u64,
}

impl MemoryHotStore {
    pub fn new(capacity_bytes: u64) -> Self {
        MemoryHotStore {
            inner: Mutex::new(HotInner {
                entries: HashMap::new(),
                total_bytes: 0,
                access_counter: 0,
            }),
            capacity_bytes,
        }
    }

    /// Number of live (non-tombstone, non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .entries
            .values()
            .filter(|e| !e.tombstone && !e.expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current live bytes (tombstones carry no value).
    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    fn insert_locked(inner: &mut HotInner, key: &str, entry: HotEntry) {
        let size = entry.size();
        if let Some(old) = inner.entries.insert(key.to_string(), entry) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.size());
        }
        inner.total_bytes += size;
    }

    /// Evict expired entries, stale tombstones, then LRU until under capacity.
    fn evict_locked(inner: &mut HotInner, capacity: u64) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;

        let dead: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in dead {
            if let Some(e) = inner.entries.remove(&k) {
                inner.total_bytes = inner.total_bytes.saturating_sub(e.size());
                removed += 1;
            }
        }

        while inner.total_bytes > capacity && !inner.entries.is_empty() {
            // LRU victim: lowest access sequence among non-tombstones
            let victim = inner
                .entries
                .iter()
                .filter(|(_, e)| !e.tombstone)
                .min_by_key(|(_, e)| e.access_seq)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    if let Some(e) = inner.entries.remove(&k) {
                        inner.total_bytes = inner.total_bytes.saturating_sub(e.size());
                        removed += 1;
                        log::debug!("[hot] Evicted '{}' ({} bytes, LRU)", k, e.size());
                    }
                }
                None => break,
            }
        }
        removed
    }
}

#[async_trait]
impl TierStore for MemoryHotStore {
    fn tier(&self) -> Tier {
        Tier::Hot
    }

    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        match self.lookup(key).await? {
            HotLookup::Hit(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        self.put_with_ttl(key, value, None).await
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.entries.remove(key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(e.size());
        }
        Ok(())
    }

    async fn describe(&self, key: &str) -> CoreResult<Option<Entry>> {
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(inner.entries.get(key).and_then(|e| {
            if e.tombstone || e.expired(now) {
                return None;
            }
            Some(Entry {
                key: key.to_string(),
                value: e.value.clone(),
                tier: Tier::Hot,
                created_at: e.created_wall,
                last_accessed_at: e.accessed_wall,
                size_bytes: e.size(),
            })
        }))
    }
}

#[async_trait]
impl HotTier for MemoryHotStore {
    async fn lookup(&self, key: &str) -> CoreResult<HotLookup> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let seq = inner.access_counter;
        let found = match inner.entries.get_mut(key) {
            Some(e) if e.expired(now) => None,
            Some(e) if e.tombstone => Some(HotLookup::Tombstone),
            Some(e) => {
                e.access_seq = seq;
                e.accessed_wall = Utc::now();
                Some(HotLookup::Hit(e.value.clone()))
            }
            None => Some(HotLookup::Miss),
        };
        match found {
            Some(result) => Ok(result),
            // Expired — reap it on the way out
            None => {
                if let Some(e) = inner.entries.remove(key) {
                    inner.total_bytes = inner.total_bytes.saturating_sub(e.size());
                }
                Ok(HotLookup::Miss)
            }
        }
    }

    async fn put_with_ttl(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CoreResult<()> {
        let now = Instant::now();
        let wall = Utc::now();
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let entry = HotEntry {
            value: value.to_vec(),
            created_at: now,
            access_seq: inner.access_counter,
            expires_at: ttl.map(|t| now + t),
            tombstone: false,
            migrated: false,
            created_wall: wall,
            accessed_wall: wall,
        };
        Self::insert_locked(&mut inner, key, entry);
        Self::evict_locked(&mut inner, self.capacity_bytes);
        Ok(())
    }

    async fn put_tombstone(&self, key: &str) -> CoreResult<()> {
        let now = Instant::now();
        let wall = Utc::now();
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let entry = HotEntry {
            value: Vec::new(),
            created_at: now,
            access_seq: inner.access_counter,
            expires_at: Some(now + Duration::from_secs(TOMBSTONE_TTL_SECS)),
            tombstone: true,
            migrated: false,
            created_wall: wall,
            accessed_wall: wall,
        };
        Self::insert_locked(&mut inner, key, entry);
        Ok(())
    }

    async fn list_eligible_for_migration(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> CoreResult<Vec<(String, Vec<u8>)>> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let mut eligible: Vec<(String, Vec<u8>)> = inner
            .entries
            .iter()
            .filter(|(_, e)| {
                !e.tombstone
                    && !e.migrated
                    && !e.expired(now)
                    && now.duration_since(e.created_at) > older_than
            })
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn mark_migrated(&self, key: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.entries.get_mut(key) {
            e.migrated = true;
        }
        Ok(())
    }

    async fn evict(&self) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        Ok(Self::evict_locked(&mut inner, self.capacity_bytes))
    }
}
