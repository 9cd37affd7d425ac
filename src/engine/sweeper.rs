// ── Engine: Migration Sweeper ──────────────────────────────────────────────
// Background task: IDLE → SCAN → MIGRATE_BATCH → IDLE on a fixed interval.
// SCAN lists hot entries past the age threshold; MIGRATE_BATCH copies each
// into warm (idempotent overwrite) and marks it migrated. The hot copy stays
// resident — LRU pressure, not migration, decides when it leaves — unless
// `drop_after_migration` is configured.

use crate::atoms::error::CoreResult;
use crate::engine::tiers::{HotTier, TierStore};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct MigrationSweeper {
    hot: Arc<dyn HotTier>,
    warm: Arc<dyn TierStore>,
    age_threshold: Duration,
    interval: Duration,
    batch_size: usize,
    drop_after_migration: bool,
}

impl MigrationSweeper {
    pub fn new(
        hot: Arc<dyn HotTier>,
        warm: Arc<dyn TierStore>,
        age_threshold: Duration,
        interval: Duration,
        batch_size: usize,
        drop_after_migration: bool,
    ) -> Self {
        MigrationSweeper { hot, warm, age_threshold, interval, batch_size, drop_after_migration }
    }

    /// One SCAN + MIGRATE_BATCH pass. Returns how many entries migrated.
    /// Safe to run repeatedly — re-migrating is a no-op overwrite in warm.
    pub async fn sweep_once(&self) -> CoreResult<usize> {
        // Reap expired entries and excess bytes while we're awake
        if let Err(e) = self.hot.evict().await {
            debug!("[sweeper] Hot evict pass failed: {}", e);
        }

        let eligible = self.hot.list_eligible_for_migration(self.age_threshold, self.batch_size).await?;
        if eligible.is_empty() {
            return Ok(0);
        }

        let mut migrated = 0usize;
        for (key, value) in eligible {
            match self.warm.put(&key, &value).await {
                Ok(()) => {
                    self.hot.mark_migrated(&key).await?;
                    if self.drop_after_migration {
                        self.hot.delete(&key).await?;
                    }
                    migrated += 1;
                }
                Err(e) => {
                    // Warm is struggling — stop the batch, the next pass retries
                    warn!("[sweeper] Warm write for '{}' failed, ending batch: {}", key, e);
                    break;
                }
            }
        }
        if migrated > 0 {
            info!("[sweeper] Migrated {} entries to warm", migrated);
        }
        Ok(migrated)
    }

    /// Run on the configured interval until the shutdown signal flips.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // First tick fires immediately; skip it so startup isn't a sweep
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!("[sweeper] Sweep failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("[sweeper] Shutdown signal received");
                            break;
                        }
                    }
                }
            }
        })
    }
}
