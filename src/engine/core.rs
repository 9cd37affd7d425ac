// ── Engine: Core wiring ────────────────────────────────────────────────────
// Builds the tiers, health table, and router from one validated config,
// spawns the two background tasks (migration sweeper, health monitor), and
// owns their shutdown signal. This is the construction seam: callers get a
// `Core` and never touch tier backends directly.

use crate::atoms::error::CoreResult;
use crate::atoms::types::{Entry, EndpointSnapshot, RouteOutcome, RouteRequest, SetOptions};
use crate::engine::config::CoreConfig;
use crate::engine::dispatch::{DispatchClient, HttpDispatchClient};
use crate::engine::health::{HealthMonitor, HealthTable};
use crate::engine::manager::{MemoryManager, MemoryStats};
use crate::engine::power::{CachedPowerReader, PowerStateProvider, SysfsPowerProvider};
use crate::engine::router::Router;
use crate::engine::sweeper::MigrationSweeper;
use crate::engine::tiers::{FsColdStore, MemoryHotStore, SqliteWarmStore};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Core {
    memory: Arc<MemoryManager>,
    router: Arc<Router>,
    table: Arc<HealthTable>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Core {
    /// Build and start with the default transport (HTTP) and power provider
    /// (Linux sysfs, mains elsewhere).
    pub fn start(config: CoreConfig) -> CoreResult<Self> {
        Self::start_with(
            config,
            Arc::new(HttpDispatchClient::new()),
            Arc::new(SysfsPowerProvider::new()),
        )
    }

    /// Build and start with injected transport and power provider. Tests and
    /// embedded deployments come through here.
    pub fn start_with(
        config: CoreConfig,
        dispatch: Arc<dyn DispatchClient>,
        power: Arc<dyn PowerStateProvider>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let hot = Arc::new(MemoryHotStore::new(config.hot.capacity_bytes));
        let warm = Arc::new(SqliteWarmStore::open(&config.warm_db_path())?);
        let cold = Arc::new(FsColdStore::open(&config.cold_root())?);

        let memory = Arc::new(MemoryManager::new(hot.clone(), warm.clone(), cold));
        let table = Arc::new(HealthTable::new(
            &config.endpoints,
            config.health.failure_threshold,
            Duration::from_secs(config.health.cooldown_secs),
        ));
        let router = Arc::new(Router::new(
            table.clone(),
            dispatch.clone(),
            CachedPowerReader::new(power),
            Some(memory.clone()),
            config.router.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweeper = MigrationSweeper::new(
            hot,
            warm,
            Duration::from_secs(config.hot.migration_age_secs),
            Duration::from_secs(config.sweeper.interval_secs),
            config.sweeper.batch_size,
            config.hot.drop_after_migration,
        );
        let monitor = HealthMonitor::new(
            table.clone(),
            dispatch,
            Duration::from_secs(config.health.probe_interval_secs),
        );

        let tasks = vec![sweeper.spawn(shutdown_rx.clone()), monitor.spawn(shutdown_rx)];
        info!(
            "[core] Started with {} endpoint(s), sweep every {}s, probe every {}s",
            config.endpoints.len(),
            config.sweeper.interval_secs,
            config.health.probe_interval_secs
        );

        Ok(Core { memory, router, table, shutdown_tx, tasks })
    }

    // ── Caller API ─────────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        self.memory.get(key).await
    }

    pub async fn set(&self, key: &str, value: &[u8], opts: SetOptions) -> CoreResult<()> {
        self.memory.set(key, value, opts).await
    }

    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        self.memory.delete(key).await
    }

    pub async fn archive(&self, key: &str) -> CoreResult<bool> {
        self.memory.archive(key).await
    }

    pub async fn describe(&self, key: &str) -> CoreResult<Option<Entry>> {
        self.memory.describe(key).await
    }

    pub async fn route(&self, request: RouteRequest) -> CoreResult<RouteOutcome> {
        self.router.route(request).await
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    pub fn health_snapshot(&self) -> Vec<EndpointSnapshot> {
        self.table.snapshot()
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Signal the background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        info!("[core] Shutting down background tasks");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
