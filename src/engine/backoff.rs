// ── Engine: Retry backoff ──────────────────────────────────────────────────
// Shared delay helper for the queued warm/cold writes. Exponential backoff
// with ±25% jitter so a recovering tier backend is not hammered in lockstep.

use std::time::{Duration, SystemTime};

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 500;

/// Maximum retry delay cap in milliseconds (30 seconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Sleep with exponential backoff + ±25% jitter. `attempt` is 0-based.
/// Returns the actual delay for logging.
pub async fn retry_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(10));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay = Duration::from_millis(apply_jitter(capped_ms));
    tokio::time::sleep(delay).await;
    delay
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(50);
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    let result = base_ms as i64 + offset;
    result.max(50) as u64
}

/// Simple jitter source using system clock nanos (no extra crate needed).
fn rand_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_in_band() {
        for _ in 0..50 {
            let d = apply_jitter(1_000);
            assert!((750..=1_250).contains(&d), "jittered delay {} out of band", d);
        }
    }

    #[test]
    fn test_jitter_floor() {
        assert!(apply_jitter(0) >= 50);
    }
}
