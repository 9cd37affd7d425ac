// ── Engine: Tiered Memory Manager ──────────────────────────────────────────
// Orchestrates the three tiers:
//   Get    — Hot → Warm → Cold, backfilling upward on hit
//   Set    — synchronous to Hot, best-effort async to Warm
//   Delete — Hot tombstone now, async deletes to Warm/Cold
//   Archive — explicit Cold write (the only way anything reaches Cold)
//
// Concurrent misses for the same key coalesce: the first resolver past Hot
// becomes the leader, everyone else waits on a oneshot for its result. Tier
// failures degrade locally — a request only fails when every tier is down.

use crate::atoms::constants::WRITE_QUEUE_MAX_RETRIES;
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{Entry, SetOptions, Tier};
use crate::engine::backoff::retry_delay;
use crate::engine::tiers::{HotLookup, HotTier, TierStore};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// What single-flight followers receive. Errors cross the channel as strings
/// because `CoreError` is not `Clone`.
type FlightResult = Result<Option<Vec<u8>>, String>;

/// A value loader for cache-miss computation (e.g. fresh inference).
pub type Loader = BoxFuture<'static, CoreResult<Vec<u8>>>;

/// Point-in-time counters, pollable by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub single_flight_waits: u64,
    pub degraded: bool,
}

pub struct MemoryManager {
    hot: Arc<dyn HotTier>,
    warm: Arc<dyn TierStore>,
    cold: Arc<dyn TierStore>,
    /// key → waiters for the in-flight resolution of that key.
    inflight: Mutex<HashMap<String, Vec<oneshot::Sender<FlightResult>>>>,
    /// key → stamp of the newest queued Warm op. A queued write or delete
    /// whose stamp is no longer current has been superseded and abandons,
    /// so retried ops cannot land out of caller order.
    warm_stamps: Arc<Mutex<HashMap<String, u64>>>,
    stamp_counter: AtomicU64,
    /// Set while Hot is unreachable; cleared on the next successful Hot op.
    degraded: AtomicBool,
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    cold_hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    single_flight_waits: AtomicU64,
}

enum FlightRole {
    Leader,
    Follower(oneshot::Receiver<FlightResult>),
}

impl MemoryManager {
    pub fn new(hot: Arc<dyn HotTier>, warm: Arc<dyn TierStore>, cold: Arc<dyn TierStore>) -> Self {
        MemoryManager {
            hot,
            warm,
            cold,
            inflight: Mutex::new(HashMap::new()),
            warm_stamps: Arc::new(Mutex::new(HashMap::new())),
            stamp_counter: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            hot_hits: AtomicU64::new(0),
            warm_hits: AtomicU64::new(0),
            cold_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            single_flight_waits: AtomicU64::new(0),
        }
    }

    /// True while the manager is serving around an unreachable Hot tier.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            hot_hits: self.hot_hits.load(Ordering::Relaxed),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            cold_hits: self.cold_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            single_flight_waits: self.single_flight_waits.load(Ordering::Relaxed),
            degraded: self.is_degraded(),
        }
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Resolve a key across the tiers. `Ok(None)` is a plain miss.
    pub async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        self.get_inner(key, None).await
    }

    /// Like `get`, but on a full miss the leader runs `loader` to compute a
    /// fresh value, stores it, and fans it out to every concurrent caller.
    pub async fn get_or_load(&self, key: &str, loader: Loader) -> CoreResult<Option<Vec<u8>>> {
        self.get_inner(key, Some(loader)).await
    }

    async fn get_inner(&self, key: &str, loader: Option<Loader>) -> CoreResult<Option<Vec<u8>>> {
        // Fast path: Hot
        let hot_down = match self.hot.lookup(key).await {
            Ok(HotLookup::Hit(v)) => {
                self.degraded.store(false, Ordering::Relaxed);
                self.hot_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(v));
            }
            Ok(HotLookup::Tombstone) => {
                // A pending delete shadows the slower tiers
                self.degraded.store(false, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Ok(HotLookup::Miss) => {
                self.degraded.store(false, Ordering::Relaxed);
                false
            }
            Err(e) if e.is_tier_unavailable() => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!("[memory] Hot tier unavailable — entering degraded mode: {}", e);
                }
                true
            }
            Err(e) => return Err(e),
        };

        // Slow path: coalesce concurrent resolutions of the same key
        match self.join_flight(key) {
            FlightRole::Follower(rx) => {
                self.single_flight_waits.fetch_add(1, Ordering::Relaxed);
                match rx.await {
                    Ok(Ok(v)) => Ok(v),
                    Ok(Err(msg)) => Err(CoreError::Other(msg)),
                    // Leader dropped without resolving (e.g. panicked) —
                    // treat as a miss rather than wedging the caller.
                    Err(_) => Ok(None),
                }
            }
            FlightRole::Leader => {
                let result = self.resolve_downstream(key, loader, hot_down).await;
                let flight: FlightResult = match &result {
                    Ok(v) => Ok(v.clone()),
                    Err(e) => Err(e.to_string()),
                };
                self.finish_flight(key, flight);
                result
            }
        }
    }

    /// Leader path: Warm → Cold → loader, with upward backfill.
    async fn resolve_downstream(
        &self,
        key: &str,
        loader: Option<Loader>,
        hot_down: bool,
    ) -> CoreResult<Option<Vec<u8>>> {
        let mut warm_down = false;

        match self.warm.get(key).await {
            Ok(Some(v)) => {
                self.warm_hits.fetch_add(1, Ordering::Relaxed);
                if !hot_down {
                    self.backfill_hot(key, &v);
                }
                return Ok(Some(v));
            }
            Ok(None) => {}
            Err(e) if e.is_tier_unavailable() => {
                warn!("[memory] Warm tier unavailable on get('{}'): {}", key, e);
                warm_down = true;
            }
            Err(e) => return Err(e),
        }

        match self.cold.get(key).await {
            Ok(Some(v)) => {
                self.cold_hits.fetch_add(1, Ordering::Relaxed);
                // Backfill warm first, then hot, off the response path
                if !warm_down {
                    self.backfill_warm(key, &v);
                }
                if !hot_down {
                    self.backfill_hot(key, &v);
                }
                return Ok(Some(v));
            }
            // Cold answered, so even with hot and warm down this is a miss
            Ok(None) => {}
            Err(e) if e.is_tier_unavailable() => {
                warn!("[memory] Cold tier unavailable on get('{}'): {}", key, e);
                if hot_down && warm_down {
                    return Err(CoreError::tier_unavailable(
                        Tier::Cold,
                        "all tiers unavailable".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e),
        }

        // Full miss — compute fresh if the caller brought a loader
        if let Some(loader) = loader {
            debug!("[memory] Full miss for '{}' — running loader", key);
            let value = loader.await?;
            self.loads.fetch_add(1, Ordering::Relaxed);
            self.set(key, &value, SetOptions::default()).await?;
            return Ok(Some(value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Report the entry and the highest tier currently holding it, without
    /// backfilling or coalescing. Tombstoned keys read as absent; unavailable
    /// tiers fall through silently because a describe is advisory.
    pub async fn describe(&self, key: &str) -> CoreResult<Option<Entry>> {
        match self.hot.lookup(key).await {
            Ok(HotLookup::Hit(_)) => return self.hot.describe(key).await,
            Ok(HotLookup::Tombstone) => return Ok(None),
            Ok(HotLookup::Miss) => {}
            Err(e) if e.is_tier_unavailable() => {}
            Err(e) => return Err(e),
        }
        match self.warm.describe(key).await {
            Ok(Some(entry)) => return Ok(Some(entry)),
            Ok(None) => {}
            Err(e) if e.is_tier_unavailable() => {}
            Err(e) => return Err(e),
        }
        match self.cold.describe(key).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_tier_unavailable() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Write synchronously to Hot, then enqueue a best-effort Warm write.
    /// Cold is never written here — use `archive`.
    pub async fn set(&self, key: &str, value: &[u8], opts: SetOptions) -> CoreResult<()> {
        match self.hot.put_with_ttl(key, value, opts.ttl).await {
            Ok(()) => {
                self.degraded.store(false, Ordering::Relaxed);
            }
            Err(e) if e.is_tier_unavailable() => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!("[memory] Hot tier unavailable on set('{}') — degraded: {}", key, e);
                }
            }
            Err(e) => return Err(e),
        }
        let stamp = self.next_warm_stamp(key);
        self.queue_warm_write(key, value, stamp);
        Ok(())
    }

    /// Remove from Hot immediately, shadow lower tiers with a tombstone, and
    /// enqueue async deletes to Warm and Cold. The Warm delete carries a
    /// per-key stamp: if a newer `set` for the same key is enqueued before
    /// the delete lands, the delete abandons instead of clobbering the
    /// fresher value. The Cold delete is unstamped — the archived copy
    /// always predates the delete.
    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        if let Err(e) = self.hot.put_tombstone(key).await {
            if e.is_tier_unavailable() {
                warn!("[memory] Hot tier unavailable on delete('{}'): {}", key, e);
            } else {
                return Err(e);
            }
        }
        let stamp = self.next_warm_stamp(key);
        self.queue_delete(self.warm.clone(), key, Some(stamp));
        self.queue_delete(self.cold.clone(), key, None);
        Ok(())
    }

    /// Explicit Cold write. Resolves the current value through the tiers and
    /// archives it synchronously. Returns false when the key is unknown.
    pub async fn archive(&self, key: &str) -> CoreResult<bool> {
        let value = match self.get(key).await? {
            Some(v) => v,
            None => return Ok(false),
        };
        self.cold.put(key, &value).await?;
        info!("[memory] Archived '{}' to cold ({} bytes)", key, value.len());
        Ok(true)
    }

    // ── Single-flight registry ─────────────────────────────────────────

    fn join_flight(&self, key: &str) -> FlightRole {
        let mut inflight = self.inflight.lock();
        match inflight.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                FlightRole::Follower(rx)
            }
            None => {
                inflight.insert(key.to_string(), Vec::new());
                FlightRole::Leader
            }
        }
    }

    fn finish_flight(&self, key: &str, result: FlightResult) {
        let waiters = self.inflight.lock().remove(key).unwrap_or_default();
        for tx in waiters {
            // A follower that gave up is not an error
            let _ = tx.send(result.clone());
        }
    }

    // ── Background write queue ─────────────────────────────────────────

    fn backfill_hot(&self, key: &str, value: &[u8]) {
        let hot = self.hot.clone();
        let key = key.to_string();
        let value = value.to_vec();
        tokio::spawn(async move {
            if let Err(e) = hot.put_with_ttl(&key, &value, None).await {
                debug!("[memory] Hot backfill for '{}' failed: {}", key, e);
            }
        });
    }

    fn backfill_warm(&self, key: &str, value: &[u8]) {
        let warm = self.warm.clone();
        let key = key.to_string();
        let value = value.to_vec();
        tokio::spawn(async move {
            if let Err(e) = warm.put(&key, &value).await {
                debug!("[memory] Warm backfill for '{}' failed: {}", key, e);
            }
        });
    }

    /// Claim the newest-op stamp for `key`. Any previously queued Warm op
    /// for the same key is superseded from this point on.
    fn next_warm_stamp(&self, key: &str) -> u64 {
        let stamp = self.stamp_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.warm_stamps.lock().insert(key.to_string(), stamp);
        stamp
    }

    /// Async Warm propagation of a Set, retried with backoff. Failures are
    /// logged, never surfaced — the Hot copy already answered the caller.
    fn queue_warm_write(&self, key: &str, value: &[u8], stamp: u64) {
        let warm = self.warm.clone();
        let stamps = self.warm_stamps.clone();
        let key = key.to_string();
        let value = value.to_vec();
        tokio::spawn(async move {
            for attempt in 0..=WRITE_QUEUE_MAX_RETRIES {
                if !stamp_is_current(&stamps, &key, stamp) {
                    debug!("[memory] Warm write for '{}' superseded, abandoning", key);
                    return;
                }
                match warm.put(&key, &value).await {
                    Ok(()) => {
                        clear_stamp(&stamps, &key, stamp);
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "[memory] Warm write for '{}' failed (attempt {}): {}",
                            key,
                            attempt + 1,
                            e
                        );
                        if attempt < WRITE_QUEUE_MAX_RETRIES {
                            retry_delay(attempt).await;
                        }
                    }
                }
            }
            warn!("[memory] Giving up on warm write for '{}'", key);
        });
    }

    fn queue_delete(&self, store: Arc<dyn TierStore>, key: &str, stamp: Option<u64>) {
        let stamps = self.warm_stamps.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let tier = store.tier();
            for attempt in 0..=WRITE_QUEUE_MAX_RETRIES {
                if let Some(stamp) = stamp {
                    if !stamp_is_current(&stamps, &key, stamp) {
                        debug!("[memory] {:?} delete for '{}' superseded, abandoning", tier, key);
                        return;
                    }
                }
                match store.delete(&key).await {
                    Ok(()) => {
                        if let Some(stamp) = stamp {
                            clear_stamp(&stamps, &key, stamp);
                        }
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "[memory] {:?} delete for '{}' failed (attempt {}): {}",
                            tier,
                            key,
                            attempt + 1,
                            e
                        );
                        if attempt < WRITE_QUEUE_MAX_RETRIES {
                            retry_delay(attempt).await;
                        }
                    }
                }
            }
            warn!("[memory] Giving up on {:?} delete for '{}'", tier, key);
        });
    }
}

/// An absent stamp means the op either completed or was superseded — both
/// mean "stop".
fn stamp_is_current(stamps: &Mutex<HashMap<String, u64>>, key: &str, stamp: u64) -> bool {
    stamps.lock().get(key).is_some_and(|s| *s == stamp)
}

fn clear_stamp(stamps: &Mutex<HashMap<String, u64>>, key: &str, stamp: u64) {
    let mut stamps = stamps.lock();
    if stamps.get(key).is_some_and(|s| *s == stamp) {
        stamps.remove(key);
    }
}
