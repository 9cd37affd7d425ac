// ── Atoms: Core types ──────────────────────────────────────────────────────
// The data structures that flow through the whole core. Independent of any
// specific tier backend or transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

// ── Tiers ──────────────────────────────────────────────────────────────────

/// The three storage levels, fastest/smallest to slowest/largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

/// One cached value plus its bookkeeping.
/// `tier` is the highest tier currently holding the copy that answered;
/// lower tiers may also hold backfilled copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Options for `MemoryManager::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Hot-tier TTL. `None` means the entry lives until evicted or deleted.
    pub ttl: Option<Duration>,
}

// ── Endpoints ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Edge,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A candidate execution target, as declared in configuration.
/// Runtime health lives in the health table, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub kind: EndpointKind,
    /// Base URL, e.g. "http://192.168.1.40:11434".
    pub address: String,
    /// Capabilities this endpoint can serve ("chat", "embed", "kv", …).
    #[serde(default)]
    pub capability_tags: Vec<String>,
}

impl Endpoint {
    /// True when this endpoint advertises every required tag.
    pub fn has_tags(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.capability_tags.contains(t))
    }
}

/// Serializable point-in-time view of one endpoint's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub kind: EndpointKind,
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub in_cooldown: bool,
    pub last_latency_ms: Option<u64>,
    pub inflight: u32,
}

// ── Power ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridState {
    OnGrid,
    OffGrid,
}

/// What the power collaborator reports. Consumed, never owned, by the router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerState {
    pub grid: GridState,
    pub battery_percent: u8,
    pub charging: bool,
}

impl PowerState {
    /// A mains-powered default for deployments without battery telemetry.
    pub fn mains() -> Self {
        PowerState { grid: GridState::OnGrid, battery_percent: 100, charging: true }
    }
}

// ── Routing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    EdgeFirst,
    CloudFirst,
    Balanced,
}

/// One routing decision instance.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub request_id: String,
    /// Opaque request body forwarded to the selected endpoint.
    pub payload: Vec<u8>,
    /// Content hash of the payload — doubles as the cache key.
    pub payload_hash: String,
    /// `None` falls back to the configured default strategy.
    pub strategy: Option<RouteStrategy>,
    /// Endpoints must advertise all of these to be candidates.
    pub capability_tags: Vec<String>,
    pub timeout_budget: Duration,
    pub allow_cache: bool,
}

impl RouteRequest {
    /// Build a request with a fresh id and the payload's content hash.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let payload_hash = hash_payload(&payload);
        RouteRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            payload,
            payload_hash,
            strategy: None,
            capability_tags: Vec::new(),
            timeout_budget: Duration::from_millis(
                crate::atoms::constants::DEFAULT_TIMEOUT_BUDGET_MS,
            ),
            allow_cache: true,
        }
    }

    pub fn with_strategy(mut self, strategy: RouteStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.capability_tags = tags;
        self
    }

    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.timeout_budget = budget;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.allow_cache = false;
        self
    }
}

/// What happened on one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Error(String),
    /// Endpoint was in the list but not dispatched to (unhealthy/cooldown).
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteAttempt {
    pub endpoint_id: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Success,
    Exhausted,
    Cancelled,
}

/// Result of a routing attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub request_id: String,
    pub final_status: RouteStatus,
    /// The endpoint that served the response, when `final_status == Success`.
    pub selected_endpoint_id: Option<String>,
    /// For caller-side labeling ("source: cloud").
    pub selected_kind: Option<EndpointKind>,
    /// Ordered history of everything tried or skipped.
    pub attempts: Vec<RouteAttempt>,
    pub response: Option<Vec<u8>>,
    pub served_from_cache: bool,
}

impl RouteOutcome {
    /// Build the outcome for a failed routing attempt, preserving history.
    /// Callers converting a `RoutingExhausted` / `DeadlineExceeded` error
    /// into a reportable record use this.
    pub fn failed(request_id: String, final_status: RouteStatus, attempts: Vec<RouteAttempt>) -> Self {
        RouteOutcome {
            request_id,
            final_status,
            selected_endpoint_id: None,
            selected_kind: None,
            attempts,
            response: None,
            served_from_cache: false,
        }
    }
}

// ── Hashing helper ─────────────────────────────────────────────────────────

/// SHA-256 hex of a payload. Cache keys for routed requests come from here.
pub fn hash_payload(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
