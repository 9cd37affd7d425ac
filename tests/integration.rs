// tiermesh integration tests — end-to-end properties of the memory manager
// and router working together, with mock transport and power doubles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tiermesh::engine::config::{CoreConfig, RouterConfig};
use tiermesh::engine::dispatch::{DispatchClient, DispatchResult};
use tiermesh::engine::health::HealthTable;
use tiermesh::engine::manager::{Loader, MemoryManager};
use tiermesh::engine::power::{CachedPowerReader, PowerStateProvider, StaticPowerProvider};
use tiermesh::engine::router::Router;
use tiermesh::engine::sweeper::MigrationSweeper;
use tiermesh::engine::tiers::{FsColdStore, MemoryHotStore, SqliteWarmStore, TierStore};
use tiermesh::{
    AttemptOutcome, Core, CoreError, Endpoint, EndpointKind, Entry, GridState, PowerState,
    RouteOutcome, RouteRequest, RouteStatus, RouteStrategy, SetOptions, Tier,
};

// ── Shared doubles ─────────────────────────────────────────────────────────

/// Wraps a tier and counts reads, so tests can assert a tier was never hit.
struct CountingTier<S> {
    inner: S,
    gets: AtomicU64,
}

impl<S> CountingTier<S> {
    fn new(inner: S) -> Self {
        CountingTier { inner, gets: AtomicU64::new(0) }
    }
    fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: TierStore> TierStore for CountingTier<S> {
    fn tier(&self) -> Tier {
        self.inner.tier()
    }
    async fn get(&self, key: &str) -> tiermesh::CoreResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }
    async fn put(&self, key: &str, value: &[u8]) -> tiermesh::CoreResult<()> {
        self.inner.put(key, value).await
    }
    async fn delete(&self, key: &str) -> tiermesh::CoreResult<()> {
        self.inner.delete(key).await
    }
    async fn describe(&self, key: &str) -> tiermesh::CoreResult<Option<Entry>> {
        self.inner.describe(key).await
    }
}

/// Scripted transport for router tests.
#[derive(Default)]
struct MockDispatch {
    behavior: Mutex<HashMap<String, MockBehavior>>,
    dispatched: Mutex<Vec<String>>,
}

#[derive(Clone)]
enum MockBehavior {
    Ok(Vec<u8>),
    Fail(String),
    Hang,
}

impl MockDispatch {
    fn set(&self, id: &str, b: MockBehavior) {
        self.behavior.lock().insert(id.to_string(), b);
    }
    fn dispatch_count(&self) -> usize {
        self.dispatched.lock().len()
    }
}

#[async_trait]
impl DispatchClient for MockDispatch {
    async fn dispatch(&self, endpoint: &Endpoint, _payload: &[u8], _timeout: Duration) -> DispatchResult {
        self.dispatched.lock().push(endpoint.id.clone());
        let behavior = self
            .behavior
            .lock()
            .get(&endpoint.id)
            .cloned()
            .unwrap_or(MockBehavior::Ok(b"ok".to_vec()));
        match behavior {
            MockBehavior::Ok(v) => {
                DispatchResult::Success { response: v, latency: Duration::from_millis(3) }
            }
            MockBehavior::Fail(msg) => DispatchResult::Error(msg),
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                unreachable!()
            }
        }
    }

    async fn probe(&self, _endpoint: &Endpoint, _timeout: Duration) -> bool {
        true
    }
}

fn endpoint(id: &str, kind: EndpointKind, tags: &[&str]) -> Endpoint {
    Endpoint {
        id: id.into(),
        kind,
        address: format!("http://{}", id),
        capability_tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn temp_dir(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tiermesh-{}-{}", prefix, uuid::Uuid::new_v4()))
}

struct MemoryFixture {
    manager: Arc<MemoryManager>,
    hot: Arc<MemoryHotStore>,
    warm: Arc<CountingTier<SqliteWarmStore>>,
    cold: Arc<FsColdStore>,
    cold_root: std::path::PathBuf,
}

fn memory_fixture(hot_capacity: u64) -> MemoryFixture {
    let hot = Arc::new(MemoryHotStore::new(hot_capacity));
    let warm = Arc::new(CountingTier::new(SqliteWarmStore::open_in_memory().unwrap()));
    let cold_root = temp_dir("cold");
    let cold = Arc::new(FsColdStore::open(&cold_root).unwrap());
    let manager = Arc::new(MemoryManager::new(hot.clone(), warm.clone(), cold.clone()));
    MemoryFixture { manager, hot, warm, cold, cold_root }
}

fn router_fixture(
    endpoints: Vec<Endpoint>,
) -> (Router, Arc<HealthTable>, Arc<MockDispatch>, Arc<StaticPowerProvider>) {
    let table = Arc::new(HealthTable::new(&endpoints, 3, Duration::from_secs(60)));
    let dispatch = Arc::new(MockDispatch::default());
    let power = Arc::new(StaticPowerProvider::mains());
    let reader =
        CachedPowerReader::with_ttl(power.clone() as Arc<dyn PowerStateProvider>, Duration::ZERO);
    let router = Router::new(table.clone(), dispatch.clone(), reader, None, RouterConfig::default());
    (router, table, dispatch, power)
}

async fn poll_until<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

// ── P1: freshness ──────────────────────────────────────────────────────────

#[tokio::test]
async fn p1_set_then_get_never_reaches_warm() {
    let f = memory_fixture(1024 * 1024);
    f.manager.set("k", b"fresh", SetOptions::default()).await.unwrap();
    assert_eq!(f.manager.get("k").await.unwrap(), Some(b"fresh".to_vec()));
    // Hot answered — no read ever reached the warm tier
    assert_eq!(f.warm.get_count(), 0);
    std::fs::remove_dir_all(&f.cold_root).ok();
}

// ── P2: migration idempotence ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn p2_double_sweep_leaves_one_warm_copy() {
    let f = memory_fixture(1024 * 1024);
    let sweeper = MigrationSweeper::new(
        f.hot.clone(),
        f.warm.clone(),
        Duration::from_secs(3_600),
        Duration::from_secs(300),
        256,
        false,
    );
    f.hot.put("x", b"payload").await.unwrap();
    tokio::time::advance(Duration::from_secs(3_700)).await;

    sweeper.sweep_once().await.unwrap();
    sweeper.sweep_once().await.unwrap();

    assert_eq!(f.warm.inner.len().unwrap(), 1);
    assert_eq!(f.warm.inner.get("x").await.unwrap(), Some(b"payload".to_vec()));
    std::fs::remove_dir_all(&f.cold_root).ok();
}

// ── P3: backfill on miss ───────────────────────────────────────────────────

#[tokio::test]
async fn p3_cold_hit_backfills_warm_and_hot() {
    let f = memory_fixture(1024 * 1024);
    f.cold.put("archived", b"from-cold").await.unwrap();

    assert_eq!(f.manager.get("archived").await.unwrap(), Some(b"from-cold".to_vec()));

    let warm = f.warm.clone();
    poll_until(
        || {
            let warm = warm.clone();
            async move { warm.inner.get("archived").await.unwrap().is_some() }
        },
        "warm backfill",
    )
    .await;
    let hot = f.hot.clone();
    poll_until(
        || {
            let hot = hot.clone();
            async move { hot.get("archived").await.unwrap().is_some() }
        },
        "hot backfill",
    )
    .await;
    std::fs::remove_dir_all(&f.cold_root).ok();
}

// ── P4: single-flight ──────────────────────────────────────────────────────

#[tokio::test]
async fn p4_concurrent_gets_resolve_downstream_once() {
    let f = memory_fixture(1024 * 1024);
    let loads = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = f.manager.clone();
        let loads = loads.clone();
        handles.push(tokio::spawn(async move {
            let loader: Loader = Box::pin(async move {
                loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(b"inference-result".to_vec())
            });
            manager.get_or_load("prompt-hash", loader).await.unwrap()
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), Some(b"inference-result".to_vec()));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1, "downstream resolution ran more than once");
    std::fs::remove_dir_all(&f.cold_root).ok();
}

// ── P5: strategy honored ───────────────────────────────────────────────────

#[tokio::test]
async fn p5_edge_first_picks_healthy_edge_over_faster_cloud() {
    let (router, table, _dispatch, _power) = router_fixture(vec![
        endpoint("edge-1", EndpointKind::Edge, &["chat"]),
        endpoint("cloud-a", EndpointKind::Cloud, &["chat"]),
        endpoint("cloud-b", EndpointKind::Cloud, &["chat"]),
    ]);
    // Clouds report excellent latency — must not matter under edge_first
    table.report_success("cloud-a", Some(Duration::from_millis(1)));
    table.report_success("cloud-b", Some(Duration::from_millis(2)));

    for _ in 0..5 {
        let req = RouteRequest::new(b"go".to_vec())
            .with_strategy(RouteStrategy::EdgeFirst)
            .with_tags(vec!["chat".into()])
            .without_cache();
        let out = router.route(req).await.unwrap();
        assert_eq!(out.selected_endpoint_id.as_deref(), Some("edge-1"));
    }
}

// ── P6: failover ───────────────────────────────────────────────────────────

#[tokio::test]
async fn p6_unhealthy_edge_fails_over_to_cloud_with_history() {
    let (router, table, _dispatch, _power) = router_fixture(vec![
        endpoint("edge-1", EndpointKind::Edge, &["chat"]),
        endpoint("cloud-a", EndpointKind::Cloud, &["chat"]),
    ]);
    for _ in 0..3 {
        table.report_failure("edge-1");
    }

    let req = RouteRequest::new(b"go".to_vec())
        .with_strategy(RouteStrategy::EdgeFirst)
        .with_tags(vec!["chat".into()])
        .without_cache();
    let out = router.route(req).await.unwrap();

    assert_eq!(out.selected_endpoint_id.as_deref(), Some("cloud-a"));
    assert_eq!(out.selected_kind, Some(EndpointKind::Cloud));
    let edge_attempt = out
        .attempts
        .iter()
        .find(|a| a.endpoint_id == "edge-1")
        .expect("skipped edge must appear in attempts");
    assert!(matches!(edge_attempt.outcome, AttemptOutcome::Skipped(_)));
}

// ── P7: power override ─────────────────────────────────────────────────────

#[tokio::test]
async fn p7_low_battery_off_grid_forces_edge_despite_cloud_first() {
    let (router, _table, dispatch, power) = router_fixture(vec![
        endpoint("edge-1", EndpointKind::Edge, &["chat"]),
        endpoint("cloud-a", EndpointKind::Cloud, &["chat"]),
    ]);
    power.set(PowerState { grid: GridState::OffGrid, battery_percent: 10, charging: false });

    let req = RouteRequest::new(b"go".to_vec())
        .with_strategy(RouteStrategy::CloudFirst)
        .with_tags(vec!["chat".into()])
        .without_cache();
    let out = router.route(req).await.unwrap();

    assert_eq!(out.selected_endpoint_id.as_deref(), Some("edge-1"));
    assert!(!dispatch.dispatched.lock().contains(&"cloud-a".to_string()));
    // The cloud endpoint was healthy — it was skipped by the override alone
    assert!(out
        .attempts
        .iter()
        .any(|a| a.endpoint_id == "cloud-a" && matches!(a.outcome, AttemptOutcome::Skipped(_))));
}

// ── P8: bounded latency ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn p8_route_never_exceeds_timeout_budget() {
    let (router, _table, dispatch, _power) = router_fixture(vec![
        endpoint("e1", EndpointKind::Edge, &["chat"]),
        endpoint("e2", EndpointKind::Edge, &["chat"]),
        endpoint("e3", EndpointKind::Edge, &["chat"]),
        endpoint("e4", EndpointKind::Edge, &["chat"]),
    ]);
    for id in ["e1", "e2", "e3", "e4"] {
        dispatch.set(id, MockBehavior::Hang);
    }

    let budget = Duration::from_millis(800);
    let started = tokio::time::Instant::now();
    let req = RouteRequest::new(b"go".to_vec())
        .with_strategy(RouteStrategy::EdgeFirst)
        .with_tags(vec!["chat".into()])
        .with_timeout(budget)
        .without_cache();
    let err = router.route(req).await.unwrap_err();

    // Paused clock advances only by armed timers — elapsed is exact
    assert!(started.elapsed() <= budget + Duration::from_millis(50));
    assert!(matches!(
        err,
        CoreError::RoutingExhausted { .. } | CoreError::DeadlineExceeded { .. }
    ));
}

// ── Scenario: LRU eviction at capacity 2 ───────────────────────────────────

#[tokio::test]
async fn scenario_lru_eviction_then_warm_miss() {
    // Hot sized for exactly two 4-byte values; entries land in hot only,
    // so an evicted key has nowhere to fall back to.
    let f = memory_fixture(8);
    f.hot.put("A", b"aaaa").await.unwrap();
    f.hot.put("B", b"bbbb").await.unwrap();
    f.hot.put("C", b"cccc").await.unwrap();

    // A was evicted; warm was never populated (never migrated) → NotFound
    assert_eq!(f.manager.get("A").await.unwrap(), None);
    assert!(f.warm.get_count() >= 1, "lookup must have fallen through to warm");

    // B is still hot
    let warm_reads = f.warm.get_count();
    assert_eq!(f.manager.get("B").await.unwrap(), Some(b"bbbb".to_vec()));
    assert_eq!(f.warm.get_count(), warm_reads, "hot hit must not touch warm");
    std::fs::remove_dir_all(&f.cold_root).ok();
}

// ── Scenario: migrate at 61 minutes, then delete from both tiers ───────────

#[tokio::test(start_paused = true)]
async fn scenario_migration_then_delete_clears_both_tiers() {
    let f = memory_fixture(1024 * 1024);
    let sweeper = MigrationSweeper::new(
        f.hot.clone(),
        f.warm.clone(),
        Duration::from_secs(3_600),
        Duration::from_secs(300),
        256,
        false,
    );

    // t=0: insert X
    f.manager.set("X", b"x-value", SetOptions::default()).await.unwrap();

    // t=61min: sweeper runs → warm contains X, hot still holds it
    tokio::time::advance(Duration::from_secs(61 * 60)).await;
    sweeper.sweep_once().await.unwrap();
    assert_eq!(f.warm.inner.get("X").await.unwrap(), Some(b"x-value".to_vec()));
    assert_eq!(f.hot.get("X").await.unwrap(), Some(b"x-value".to_vec()));

    // t=62min: delete → gone from hot now, from warm within the async window
    tokio::time::advance(Duration::from_secs(60)).await;
    f.manager.delete("X").await.unwrap();
    assert_eq!(f.manager.get("X").await.unwrap(), None);

    let warm = f.warm.clone();
    poll_until(
        || {
            let warm = warm.clone();
            async move { warm.inner.get("X").await.unwrap().is_none() }
        },
        "async warm delete",
    )
    .await;
    std::fs::remove_dir_all(&f.cold_root).ok();
}

// ── Full core wiring ───────────────────────────────────────────────────────

#[tokio::test]
async fn core_end_to_end_with_mock_transport() {
    let warm_db = temp_dir("core-warm");
    let cold_root = temp_dir("core-cold");

    let mut config = CoreConfig::default();
    config.warm.db_path = Some(warm_db.join("warm.db"));
    config.cold.root_dir = Some(cold_root.clone());
    config.endpoints = vec![
        endpoint("edge-1", EndpointKind::Edge, &["chat"]),
        endpoint("cloud-a", EndpointKind::Cloud, &["chat"]),
    ];

    let dispatch = Arc::new(MockDispatch::default());
    dispatch.set("edge-1", MockBehavior::Ok(b"hello from edge".to_vec()));
    let power = Arc::new(StaticPowerProvider::mains());
    let core = Core::start_with(config, dispatch.clone(), power).unwrap();

    // KV surface
    core.set("greeting", b"hi", SetOptions::default()).await.unwrap();
    assert_eq!(core.get("greeting").await.unwrap(), Some(b"hi".to_vec()));
    let entry = core.describe("greeting").await.unwrap().expect("entry exists");
    assert_eq!(entry.tier, Tier::Hot);
    assert_eq!(entry.size_bytes, 2);
    assert!(core.archive("greeting").await.unwrap());
    core.delete("greeting").await.unwrap();
    assert_eq!(core.get("greeting").await.unwrap(), None);

    // Routing surface, with response cache write-back
    let req = RouteRequest::new(b"what is up".to_vec())
        .with_strategy(RouteStrategy::EdgeFirst)
        .with_tags(vec!["chat".into()]);
    let out = core.route(req).await.unwrap();
    assert_eq!(out.final_status, RouteStatus::Success);
    assert_eq!(out.response.as_deref(), Some(b"hello from edge".as_slice()));

    let again = RouteRequest::new(b"what is up".to_vec())
        .with_strategy(RouteStrategy::EdgeFirst)
        .with_tags(vec!["chat".into()]);
    let cached = core.route(again).await.unwrap();
    assert!(cached.served_from_cache);
    assert_eq!(dispatch.dispatch_count(), 1);

    // Health snapshot covers both endpoints
    let snapshot = core.health_snapshot();
    assert_eq!(snapshot.len(), 2);

    core.shutdown().await;
    std::fs::remove_dir_all(&warm_db).ok();
    std::fs::remove_dir_all(&cold_root).ok();
}

#[tokio::test]
async fn exhausted_error_converts_to_outcome_record() {
    let (router, _table, dispatch, _power) =
        router_fixture(vec![endpoint("edge-1", EndpointKind::Edge, &["chat"])]);
    dispatch.set("edge-1", MockBehavior::Fail("offline".into()));

    let req = RouteRequest::new(b"go".to_vec())
        .with_strategy(RouteStrategy::EdgeFirst)
        .with_tags(vec!["chat".into()])
        .without_cache();
    let request_id = req.request_id.clone();
    let err = router.route(req).await.unwrap_err();

    let outcome = match err {
        CoreError::RoutingExhausted { attempts } => {
            RouteOutcome::failed(request_id, RouteStatus::Exhausted, attempts)
        }
        CoreError::DeadlineExceeded { attempts } => {
            RouteOutcome::failed(request_id, RouteStatus::Cancelled, attempts)
        }
        other => panic!("unexpected error {:?}", other),
    };
    assert_eq!(outcome.final_status, RouteStatus::Exhausted);
    assert_eq!(outcome.attempts.len(), 1);
    assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Error(_)));
}
