// ── Engine: Configuration ──────────────────────────────────────────────────
// One explicit config struct, loaded from a TOML file (plus a couple of env
// overrides for paths) and validated once at startup. No runtime string
// dispatch — strategies and thresholds are typed here.

use crate::atoms::constants::*;
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{Endpoint, RouteStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

// ── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotConfig {
    /// Capacity in bytes before LRU eviction.
    #[serde(default = "default_hot_capacity")]
    pub capacity_bytes: u64,
    /// Age in seconds after which an entry is eligible for warm migration.
    #[serde(default = "default_migration_age")]
    pub migration_age_secs: u64,
    /// Remove the hot copy once migrated instead of waiting for LRU pressure.
    #[serde(default)]
    pub drop_after_migration: bool,
}

fn default_hot_capacity() -> u64 { DEFAULT_HOT_CAPACITY_BYTES }
fn default_migration_age() -> u64 { DEFAULT_MIGRATION_AGE_SECS }

impl Default for HotConfig {
    fn default() -> Self {
        HotConfig {
            capacity_bytes: DEFAULT_HOT_CAPACITY_BYTES,
            migration_age_secs: DEFAULT_MIGRATION_AGE_SECS,
            drop_after_migration: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmConfig {
    /// SQLite file path. `None` → `~/.tiermesh/warm.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColdConfig {
    /// Blob store root directory. `None` → `~/.tiermesh/cold`.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Consecutive failures before an endpoint is marked unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_probe_interval() -> u64 { DEFAULT_PROBE_INTERVAL_SECS }
fn default_failure_threshold() -> u32 { DEFAULT_FAILURE_THRESHOLD }
fn default_cooldown() -> u64 { DEFAULT_COOLDOWN_SECS }

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_strategy")]
    pub default_strategy: RouteStrategy,
    /// Below this battery % while off-grid, routing collapses to edge-only.
    #[serde(default = "default_battery_threshold")]
    pub off_grid_battery_threshold: u8,
    /// Floor for one dispatch attempt when dividing the remaining budget.
    #[serde(default = "default_min_attempt_timeout")]
    pub min_attempt_timeout_ms: u64,
}

fn default_strategy() -> RouteStrategy { RouteStrategy::Balanced }
fn default_battery_threshold() -> u8 { DEFAULT_OFF_GRID_BATTERY_THRESHOLD }
fn default_min_attempt_timeout() -> u64 { MIN_ATTEMPT_TIMEOUT_MS }

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            default_strategy: RouteStrategy::Balanced,
            off_grid_battery_threshold: DEFAULT_OFF_GRID_BATTERY_THRESHOLD,
            min_attempt_timeout_ms: MIN_ATTEMPT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_migration_batch")]
    pub batch_size: usize,
}

fn default_sweep_interval() -> u64 { DEFAULT_SWEEP_INTERVAL_SECS }
fn default_migration_batch() -> usize { DEFAULT_MIGRATION_BATCH }

impl Default for SweeperConfig {
    fn default() -> Self {
        SweeperConfig {
            interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            batch_size: DEFAULT_MIGRATION_BATCH,
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub hot: HotConfig,
    #[serde(default)]
    pub warm: WarmConfig,
    #[serde(default)]
    pub cold: ColdConfig,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

impl CoreConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml(s: &str) -> CoreResult<Self> {
        let mut cfg: CoreConfig =
            toml::from_str(s).map_err(|e| CoreError::Config(format!("TOML parse: {}", e)))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: &std::path::Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// `TIERMESH_WARM_DB` / `TIERMESH_COLD_DIR` override the file paths —
    /// the only settings that routinely differ between deploy targets.
    fn apply_env_overrides(&mut self) {
        if let Ok(p) = std::env::var("TIERMESH_WARM_DB") {
            if !p.is_empty() {
                self.warm.db_path = Some(PathBuf::from(p));
            }
        }
        if let Ok(p) = std::env::var("TIERMESH_COLD_DIR") {
            if !p.is_empty() {
                self.cold.root_dir = Some(PathBuf::from(p));
            }
        }
    }

    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> CoreResult<()> {
        if self.hot.capacity_bytes == 0 {
            return Err(CoreError::Config("hot.capacity_bytes must be > 0".into()));
        }
        if self.health.failure_threshold == 0 {
            return Err(CoreError::Config("health.failure_threshold must be >= 1".into()));
        }
        if self.router.off_grid_battery_threshold > 100 {
            return Err(CoreError::Config(
                "router.off_grid_battery_threshold must be 0–100".into(),
            ));
        }
        if self.sweeper.batch_size == 0 {
            return Err(CoreError::Config("sweeper.batch_size must be >= 1".into()));
        }
        let mut seen = HashSet::new();
        for ep in &self.endpoints {
            if ep.id.is_empty() {
                return Err(CoreError::Config("endpoint id must not be empty".into()));
            }
            if ep.address.is_empty() {
                return Err(CoreError::Config(format!("endpoint '{}' has no address", ep.id)));
            }
            if !seen.insert(ep.id.as_str()) {
                return Err(CoreError::Config(format!("duplicate endpoint id '{}'", ep.id)));
            }
        }
        Ok(())
    }

    /// Resolved warm DB path (creates the parent dir).
    pub fn warm_db_path(&self) -> PathBuf {
        match &self.warm.db_path {
            Some(p) => p.clone(),
            None => data_dir().join("warm.db"),
        }
    }

    /// Resolved cold store root.
    pub fn cold_root(&self) -> PathBuf {
        match &self.cold.root_dir {
            Some(p) => p.clone(),
            None => data_dir().join("cold"),
        }
    }
}

/// `~/.tiermesh`, created on first use.
fn data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_default();
    let dir = home.join(".tiermesh");
    std::fs::create_dir_all(&dir).ok();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::EndpointKind;

    #[test]
    fn test_defaults_validate() {
        let cfg = CoreConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.health.failure_threshold, 3);
        assert_eq!(cfg.router.off_grid_battery_threshold, 20);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let cfg = CoreConfig::from_toml(
            r#"
            [hot]
            capacity_bytes = 1024

            [[endpoints]]
            id = "pi-edge"
            kind = "edge"
            address = "http://192.168.1.40:8080"
            capability_tags = ["chat"]

            [[endpoints]]
            id = "cloud-a"
            kind = "cloud"
            address = "https://api.example.com"

            [router]
            default_strategy = "edge_first"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.hot.capacity_bytes, 1024);
        assert_eq!(cfg.endpoints.len(), 2);
        assert_eq!(cfg.endpoints[0].kind, EndpointKind::Edge);
        assert_eq!(cfg.router.default_strategy, RouteStrategy::EdgeFirst);
        // Untouched sections keep their defaults
        assert_eq!(cfg.sweeper.interval_secs, 300);
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let err = CoreConfig::from_toml(
            r#"
            [[endpoints]]
            id = "a"
            kind = "edge"
            address = "http://x"

            [[endpoints]]
            id = "a"
            kind = "cloud"
            address = "http://y"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate endpoint id"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CoreConfig::from_toml("[hot]\ncapacity_bytes = 0\n").unwrap_err();
        assert!(err.to_string().contains("capacity_bytes"));
    }
}
