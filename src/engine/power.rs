// ── Engine: Power State ────────────────────────────────────────────────────
// The power collaborator is consumed, never owned: the router only needs
// `{on_grid|off_grid, battery_percent, charging}` before each decision.
// Reads go through a short-TTL cache so a burst of routing calls doesn't
// hammer the provider.

use crate::atoms::constants::POWER_CACHE_TTL_MS;
use crate::atoms::error::CoreResult;
use crate::atoms::types::{GridState, PowerState};
use async_trait::async_trait;
use log::warn;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait PowerStateProvider: Send + Sync {
    async fn power_state(&self) -> CoreResult<PowerState>;
}

// ── Static provider ────────────────────────────────────────────────────────

/// Fixed or test-driven power state. Mains-powered deployments use this with
/// the default state and never think about it again.
pub struct StaticPowerProvider {
    state: Mutex<PowerState>,
}

impl StaticPowerProvider {
    pub fn new(state: PowerState) -> Self {
        StaticPowerProvider { state: Mutex::new(state) }
    }

    pub fn mains() -> Self {
        Self::new(PowerState::mains())
    }

    pub fn set(&self, state: PowerState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl PowerStateProvider for StaticPowerProvider {
    async fn power_state(&self) -> CoreResult<PowerState> {
        Ok(*self.state.lock())
    }
}

// ── Sysfs provider (Linux) ─────────────────────────────────────────────────

/// Reads `/sys/class/power_supply/<battery>/{capacity,status}`. A missing
/// battery directory reads as mains power, which is what a desktop or a
/// rack box without battery telemetry should look like.
pub struct SysfsPowerProvider {
    battery_dir: PathBuf,
}

impl SysfsPowerProvider {
    pub fn new() -> Self {
        Self::with_battery_dir(PathBuf::from("/sys/class/power_supply/BAT0"))
    }

    pub fn with_battery_dir(battery_dir: PathBuf) -> Self {
        SysfsPowerProvider { battery_dir }
    }
}

impl Default for SysfsPowerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerStateProvider for SysfsPowerProvider {
    async fn power_state(&self) -> CoreResult<PowerState> {
        let capacity_path = self.battery_dir.join("capacity");
        let status_path = self.battery_dir.join("status");

        if !capacity_path.exists() {
            return Ok(PowerState::mains());
        }

        let capacity = std::fs::read_to_string(&capacity_path)?
            .trim()
            .parse::<u8>()
            .unwrap_or(100)
            .min(100);
        let status = std::fs::read_to_string(&status_path).unwrap_or_default();
        let status = status.trim();

        let charging = status.eq_ignore_ascii_case("charging");
        let grid = if status.eq_ignore_ascii_case("discharging") {
            GridState::OffGrid
        } else {
            GridState::OnGrid
        };

        Ok(PowerState { grid, battery_percent: capacity, charging })
    }
}

// ── Cached reader ──────────────────────────────────────────────────────────

/// TTL cache in front of a provider. On a provider error the last known
/// state is served; with no history it falls back to mains, which never
/// triggers the power override.
pub struct CachedPowerReader {
    provider: Arc<dyn PowerStateProvider>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, PowerState)>>,
}

impl CachedPowerReader {
    pub fn new(provider: Arc<dyn PowerStateProvider>) -> Self {
        Self::with_ttl(provider, Duration::from_millis(POWER_CACHE_TTL_MS))
    }

    pub fn with_ttl(provider: Arc<dyn PowerStateProvider>, ttl: Duration) -> Self {
        CachedPowerReader { provider, ttl, cached: Mutex::new(None) }
    }

    pub async fn current(&self) -> PowerState {
        {
            let cached = self.cached.lock();
            if let Some((at, state)) = *cached {
                if at.elapsed() < self.ttl {
                    return state;
                }
            }
        }

        match self.provider.power_state().await {
            Ok(state) => {
                *self.cached.lock() = Some((Instant::now(), state));
                state
            }
            Err(e) => {
                warn!("[power] Provider read failed, using last known state: {}", e);
                let cached = self.cached.lock();
                cached.map(|(_, s)| s).unwrap_or_else(PowerState::mains)
            }
        }
    }
}
