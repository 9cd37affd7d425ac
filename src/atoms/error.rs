// ── Atoms: Error Types ─────────────────────────────────────────────────────
// Single canonical error enum for the core, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Network, Tier, Routing…).
//   • `#[from]` wires std/external conversions automatically.
//   • Cache misses are NOT errors — `MemoryManager::get` returns Option.
//   • Routing failures carry the full attempt history so callers never see a
//     silent partial failure.

use crate::atoms::types::{RouteAttempt, Tier};
use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CoreError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite warm-tier failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A tier backend is unreachable. Distinct from a miss so callers can
    /// skip to the next tier instead of treating it as not-found.
    #[error("Tier {tier:?} unavailable: {message}")]
    TierUnavailable { tier: Tier, message: String },

    /// Core configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every candidate endpoint was tried (or skipped) and none succeeded.
    #[error("Routing exhausted after {} attempt(s)", attempts.len())]
    RoutingExhausted { attempts: Vec<RouteAttempt> },

    /// The caller's timeout budget ran out before the candidate list did.
    #[error("Deadline exceeded after {} attempt(s)", attempts.len())]
    DeadlineExceeded { attempts: Vec<RouteAttempt> },

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl CoreError {
    /// A tier-unavailable error with tier and detail.
    pub fn tier_unavailable(tier: Tier, message: impl Into<String>) -> Self {
        Self::TierUnavailable { tier, message: message.into() }
    }

    /// True when this error means "skip this tier, keep going".
    pub fn is_tier_unavailable(&self) -> bool {
        matches!(self, Self::TierUnavailable { .. })
    }
}

// ── Bridge: String → CoreError ─────────────────────────────────────────────
// Allows `?` on helpers still returning `Result<T, String>`.

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All core operations return this type.
pub type CoreResult<T> = Result<T, CoreError>;
