// tiermesh — Tiered memory core + power/health-aware request router.
// Callers (sync layers, voice frontends, workflow glue) talk to two surfaces:
//   MemoryManager  — Get/Set/Delete/Archive over hot/warm/cold tiers
//   Router         — Route(request) over edge/cloud endpoints
// Everything else here exists to keep those two fast, deduplicated, and
// non-fatal under partial failure.

pub mod atoms;
pub mod engine;

pub use atoms::error::{CoreError, CoreResult};
pub use atoms::types::{
    AttemptOutcome, Endpoint, EndpointKind, Entry, GridState, HealthState, PowerState,
    RouteAttempt, RouteOutcome, RouteRequest, RouteStatus, RouteStrategy, SetOptions, Tier,
};
pub use engine::config::CoreConfig;
pub use engine::core::Core;
pub use engine::manager::MemoryManager;
pub use engine::router::Router;
