// ── Engine: Endpoint Health ────────────────────────────────────────────────
// The health table is the single shared read model the router consults.
// Writers: the monitor's probe loop, plus ad hoc failure/success reports
// from the dispatch path (treated exactly like probe results for counter
// purposes). N consecutive failures trip an endpoint to unhealthy with a
// cooldown; a successful probe after cooldown flips it back.

use crate::atoms::constants::PROBE_TIMEOUT_SECS;
use crate::atoms::types::{Endpoint, EndpointSnapshot, HealthState};
use crate::engine::dispatch::DispatchClient;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct EndpointState {
    endpoint: Endpoint,
    health: HealthState,
    consecutive_failures: u32,
    last_checked_at: Option<DateTime<Utc>>,
    cooldown_until: Option<Instant>,
    last_latency_ms: Option<u64>,
    /// Dispatches currently in flight — the load half of `balanced`.
    inflight: u32,
}

/// What the router needs to know about one candidate.
#[derive(Debug, Clone)]
pub struct CandidateInfo {
    pub endpoint: Endpoint,
    pub health: HealthState,
    pub latency_ms: Option<u64>,
    pub inflight: u32,
}

pub struct HealthTable {
    states: RwLock<HashMap<String, EndpointState>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl HealthTable {
    pub fn new(endpoints: &[Endpoint], failure_threshold: u32, cooldown: Duration) -> Self {
        let states = endpoints
            .iter()
            .map(|ep| {
                (
                    ep.id.clone(),
                    EndpointState {
                        endpoint: ep.clone(),
                        health: HealthState::Healthy,
                        consecutive_failures: 0,
                        last_checked_at: None,
                        cooldown_until: None,
                        last_latency_ms: None,
                        inflight: 0,
                    },
                )
            })
            .collect();
        HealthTable { states: RwLock::new(states), failure_threshold, cooldown }
    }

    /// Record a successful probe or dispatch. Resets the failure counter and
    /// restores the endpoint to healthy.
    pub fn report_success(&self, id: &str, latency: Option<Duration>) {
        let mut states = self.states.write();
        if let Some(s) = states.get_mut(id) {
            if s.health == HealthState::Unhealthy {
                info!("[health] Endpoint '{}' recovered", id);
            }
            s.health = HealthState::Healthy;
            s.consecutive_failures = 0;
            s.cooldown_until = None;
            s.last_checked_at = Some(Utc::now());
            if let Some(l) = latency {
                s.last_latency_ms = Some(l.as_millis() as u64);
            }
        }
    }

    /// Record a failed probe or dispatch. At the threshold the endpoint goes
    /// unhealthy and enters cooldown.
    pub fn report_failure(&self, id: &str) {
        let mut states = self.states.write();
        if let Some(s) = states.get_mut(id) {
            s.consecutive_failures += 1;
            s.last_checked_at = Some(Utc::now());
            if s.consecutive_failures >= self.failure_threshold {
                if s.health != HealthState::Unhealthy {
                    warn!(
                        "[health] Endpoint '{}' unhealthy after {} consecutive failures — cooling down {:?}",
                        id, s.consecutive_failures, self.cooldown
                    );
                }
                s.health = HealthState::Unhealthy;
                s.cooldown_until = Some(Instant::now() + self.cooldown);
            } else {
                s.health = HealthState::Degraded;
            }
        }
    }

    /// True when an unhealthy endpoint is still inside its cooldown window.
    pub fn in_cooldown(&self, id: &str) -> bool {
        let states = self.states.read();
        states
            .get(id)
            .and_then(|s| s.cooldown_until)
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn health_of(&self, id: &str) -> Option<HealthState> {
        self.states.read().get(id).map(|s| s.health)
    }

    pub fn dispatch_started(&self, id: &str) {
        if let Some(s) = self.states.write().get_mut(id) {
            s.inflight += 1;
        }
    }

    pub fn dispatch_finished(&self, id: &str) {
        if let Some(s) = self.states.write().get_mut(id) {
            s.inflight = s.inflight.saturating_sub(1);
        }
    }

    /// Every registered endpoint with its current runtime view.
    pub fn candidates(&self) -> Vec<CandidateInfo> {
        let states = self.states.read();
        states
            .values()
            .map(|s| CandidateInfo {
                endpoint: s.endpoint.clone(),
                health: s.health,
                latency_ms: s.last_latency_ms,
                inflight: s.inflight,
            })
            .collect()
    }

    /// Serializable view for callers and logs.
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = Instant::now();
        let states = self.states.read();
        let mut snap: Vec<EndpointSnapshot> = states
            .values()
            .map(|s| EndpointSnapshot {
                id: s.endpoint.id.clone(),
                kind: s.endpoint.kind,
                health: s.health,
                consecutive_failures: s.consecutive_failures,
                last_checked_at: s.last_checked_at,
                in_cooldown: s.cooldown_until.is_some_and(|u| now < u),
                last_latency_ms: s.last_latency_ms,
                inflight: s.inflight,
            })
            .collect();
        snap.sort_by(|a, b| a.id.cmp(&b.id));
        snap
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.states.read().values().map(|s| s.endpoint.clone()).collect()
    }
}

// ── Monitor ────────────────────────────────────────────────────────────────

/// Background probe loop. Probes every endpoint each interval, except
/// unhealthy ones still in cooldown — those get their recovery probe once
/// the cooldown elapses.
pub struct HealthMonitor {
    table: Arc<HealthTable>,
    client: Arc<dyn DispatchClient>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(table: Arc<HealthTable>, client: Arc<dyn DispatchClient>, interval: Duration) -> Self {
        HealthMonitor { table, client, interval }
    }

    /// One probe pass over every due endpoint (exposed for tests).
    pub async fn probe_once(&self) {
        let probe_timeout = Duration::from_secs(PROBE_TIMEOUT_SECS);
        for ep in self.table.endpoints() {
            if self.table.health_of(&ep.id) == Some(HealthState::Unhealthy)
                && self.table.in_cooldown(&ep.id)
            {
                debug!("[health] Skipping '{}' — still cooling down", ep.id);
                continue;
            }
            if self.client.probe(&ep, probe_timeout).await {
                self.table.report_success(&ep.id, None);
            } else {
                self.table.report_failure(&ep.id);
            }
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.probe_once().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("[health] Shutdown signal received");
                            break;
                        }
                    }
                }
            }
        })
    }
}
