// ── Atoms: Tunable defaults ────────────────────────────────────────────────
// Every value here can be overridden through CoreConfig; these are the
// out-of-the-box numbers.

/// Hot tier capacity in bytes before LRU eviction kicks in.
pub const DEFAULT_HOT_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

/// Age after which a hot entry becomes eligible for warm migration (1 hour).
pub const DEFAULT_MIGRATION_AGE_SECS: u64 = 3_600;

/// How often the migration sweeper wakes up.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Maximum entries migrated per sweep pass.
pub const DEFAULT_MIGRATION_BATCH: usize = 256;

/// How long a delete tombstone shadows the slower tiers.
pub const TOMBSTONE_TTL_SECS: u64 = 30;

/// Health probe interval.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 20;

/// Consecutive probe/dispatch failures before an endpoint goes unhealthy.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Cooldown before an unhealthy endpoint may be probed back to healthy.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Per-probe HTTP timeout.
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Battery percentage below which off-grid power forces edge-only routing.
pub const DEFAULT_OFF_GRID_BATTERY_THRESHOLD: u8 = 20;

/// Default routing budget when the caller does not supply one.
pub const DEFAULT_TIMEOUT_BUDGET_MS: u64 = 30_000;

/// Floor for a single dispatch attempt so late candidates still get a chance.
pub const MIN_ATTEMPT_TIMEOUT_MS: u64 = 250;

/// How long a polled power state stays fresh before re-reading the provider.
pub const POWER_CACHE_TTL_MS: u64 = 2_000;

/// Retries for queued warm/cold writes before giving up on the operation.
pub const WRITE_QUEUE_MAX_RETRIES: u32 = 3;
