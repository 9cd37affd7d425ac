// ── Engine: Request Router ─────────────────────────────────────────────────
// SELECT_STRATEGY → APPLY_POWER_OVERRIDE → BUILD_CANDIDATE_LIST →
// DISPATCH_NEXT → (SUCCESS | RETRY_NEXT | EXHAUSTED)
//
// Deterministic given the health table, power state, and strategy at entry:
// the candidate list is fully ordered before the first dispatch, ties break
// on endpoint id, and nothing retries beyond the list. Worst-case latency is
// the caller's timeout budget — the deadline is checked before every attempt
// and an in-flight dispatch is cancelled when it expires.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{
    AttemptOutcome, EndpointKind, GridState, HealthState, RouteAttempt, RouteOutcome,
    RouteRequest, RouteStatus, RouteStrategy, SetOptions,
};
use crate::engine::config::RouterConfig;
use crate::engine::dispatch::{DispatchClient, DispatchResult};
use crate::engine::health::{CandidateInfo, HealthTable};
use crate::engine::manager::MemoryManager;
use crate::engine::power::CachedPowerReader;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub struct Router {
    table: Arc<HealthTable>,
    dispatch: Arc<dyn DispatchClient>,
    power: CachedPowerReader,
    /// When present, `allow_cache` requests short-circuit on a cached result
    /// and successful responses are written back under the payload hash.
    memory: Option<Arc<MemoryManager>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        table: Arc<HealthTable>,
        dispatch: Arc<dyn DispatchClient>,
        power: CachedPowerReader,
        memory: Option<Arc<MemoryManager>>,
        config: RouterConfig,
    ) -> Self {
        Router { table, dispatch, power, memory, config }
    }

    /// Route one request. `Ok` carries the response and which endpoint served
    /// it; exhaustion and deadline expiry are typed errors carrying the full
    /// attempt history.
    pub async fn route(&self, req: RouteRequest) -> CoreResult<RouteOutcome> {
        // Cache short-circuit before any dispatch
        if req.allow_cache {
            if let Some(memory) = &self.memory {
                if let Some(cached) = memory.get(&req.payload_hash).await? {
                    debug!("[router] Cache hit for request {}", req.request_id);
                    return Ok(RouteOutcome {
                        request_id: req.request_id,
                        final_status: RouteStatus::Success,
                        selected_endpoint_id: None,
                        selected_kind: None,
                        attempts: Vec::new(),
                        response: Some(cached),
                        served_from_cache: true,
                    });
                }
            }
        }

        // SELECT_STRATEGY
        let strategy = req.strategy.unwrap_or(self.config.default_strategy);

        // APPLY_POWER_OVERRIDE — a hard safety constraint, not a tie-break
        let power = self.power.current().await;
        let edge_only = power.grid == GridState::OffGrid
            && power.battery_percent < self.config.off_grid_battery_threshold;
        if edge_only {
            info!(
                "[router] Power override: off-grid at {}% — edge-only for request {}",
                power.battery_percent, req.request_id
            );
        }

        // BUILD_CANDIDATE_LIST
        let mut attempts: Vec<RouteAttempt> = Vec::new();
        let candidates = self.build_candidates(&req, strategy, edge_only, &mut attempts);
        if candidates.is_empty() {
            warn!("[router] No selectable endpoints for request {}", req.request_id);
            return Err(CoreError::RoutingExhausted { attempts });
        }

        // DISPATCH_NEXT
        let deadline = Instant::now() + req.timeout_budget;
        let total = candidates.len();
        for (idx, cand) in candidates.into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::DeadlineExceeded { attempts });
            }
            let attempt_timeout = self.attempt_timeout(remaining, total - idx);
            let ep = &cand.endpoint;

            debug!(
                "[router] Dispatching request {} to '{}' (timeout {:?})",
                req.request_id, ep.id, attempt_timeout
            );
            self.table.dispatch_started(&ep.id);
            let result = tokio::time::timeout(
                attempt_timeout,
                self.dispatch.dispatch(ep, &req.payload, attempt_timeout),
            )
            .await;
            self.table.dispatch_finished(&ep.id);

            match result {
                Ok(DispatchResult::Success { response, latency }) => {
                    self.table.report_success(&ep.id, Some(latency));
                    attempts.push(RouteAttempt {
                        endpoint_id: ep.id.clone(),
                        outcome: AttemptOutcome::Success,
                    });
                    if req.allow_cache {
                        if let Some(memory) = &self.memory {
                            if let Err(e) =
                                memory.set(&req.payload_hash, &response, SetOptions::default()).await
                            {
                                warn!("[router] Response cache write failed: {}", e);
                            }
                        }
                    }
                    return Ok(RouteOutcome {
                        request_id: req.request_id,
                        final_status: RouteStatus::Success,
                        selected_endpoint_id: Some(ep.id.clone()),
                        selected_kind: Some(ep.kind),
                        attempts,
                        response: Some(response),
                        served_from_cache: false,
                    });
                }
                Ok(DispatchResult::Timeout) | Err(_) => {
                    // Err(_) is our own deadline guard firing — same treatment
                    warn!("[router] '{}' timed out for request {}", ep.id, req.request_id);
                    self.table.report_failure(&ep.id);
                    attempts.push(RouteAttempt {
                        endpoint_id: ep.id.clone(),
                        outcome: AttemptOutcome::Timeout,
                    });
                }
                Ok(DispatchResult::Error(msg)) => {
                    warn!("[router] '{}' failed for request {}: {}", ep.id, req.request_id, msg);
                    self.table.report_failure(&ep.id);
                    attempts.push(RouteAttempt {
                        endpoint_id: ep.id.clone(),
                        outcome: AttemptOutcome::Error(msg),
                    });
                }
            }
        }

        // EXHAUSTED
        Err(CoreError::RoutingExhausted { attempts })
    }

    /// Latest health snapshot, for caller-side display.
    pub fn health_snapshot(&self) -> Vec<crate::atoms::types::EndpointSnapshot> {
        self.table.snapshot()
    }

    /// Filter by tags / health / power override, then order per strategy.
    /// Skipped endpoints are recorded in `attempts` so the history is whole.
    fn build_candidates(
        &self,
        req: &RouteRequest,
        strategy: RouteStrategy,
        edge_only: bool,
        attempts: &mut Vec<RouteAttempt>,
    ) -> Vec<CandidateInfo> {
        let mut selectable: Vec<CandidateInfo> = Vec::new();
        let mut all = self.table.candidates();
        all.sort_by(|a, b| a.endpoint.id.cmp(&b.endpoint.id));

        for cand in all {
            if !cand.endpoint.has_tags(&req.capability_tags) {
                continue; // wrong capabilities — not part of this decision at all
            }
            if edge_only && cand.endpoint.kind != EndpointKind::Edge {
                attempts.push(RouteAttempt {
                    endpoint_id: cand.endpoint.id.clone(),
                    outcome: AttemptOutcome::Skipped("power override: edge-only".into()),
                });
                continue;
            }
            if cand.health == HealthState::Unhealthy {
                attempts.push(RouteAttempt {
                    endpoint_id: cand.endpoint.id.clone(),
                    outcome: AttemptOutcome::Skipped("unhealthy".into()),
                });
                continue;
            }
            selectable.push(cand);
        }

        // Composite load/latency score — lower is better. Ties break on id
        // (the list was id-sorted above and sort_by_key is stable).
        let score = |c: &CandidateInfo| -> u64 {
            c.inflight as u64 * 100 + c.latency_ms.unwrap_or(0)
        };
        let health_rank = |c: &CandidateInfo| -> u8 {
            match c.health {
                HealthState::Healthy => 0,
                HealthState::Degraded => 1,
                HealthState::Unhealthy => 2,
            }
        };
        let kind_rank = |c: &CandidateInfo| -> u8 {
            match (strategy, c.endpoint.kind) {
                (RouteStrategy::EdgeFirst, EndpointKind::Edge) => 0,
                (RouteStrategy::EdgeFirst, EndpointKind::Cloud) => 1,
                (RouteStrategy::CloudFirst, EndpointKind::Cloud) => 0,
                (RouteStrategy::CloudFirst, EndpointKind::Edge) => 1,
                (RouteStrategy::Balanced, _) => 0,
            }
        };
        selectable.sort_by_key(|c| (kind_rank(c), health_rank(c), score(c)));
        selectable
    }

    /// Share of the remaining budget for one attempt, floored so the tail of
    /// the list still gets a usable slice.
    fn attempt_timeout(&self, remaining: Duration, candidates_left: usize) -> Duration {
        let share = remaining / candidates_left.max(1) as u32;
        let floor = Duration::from_millis(self.config.min_attempt_timeout_ms);
        share.max(floor).min(remaining)
    }
}
