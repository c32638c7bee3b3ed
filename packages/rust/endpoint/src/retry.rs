//! Backoff timing and `Retry-After` parsing. Which failures are retried
//! is decided by `KbSyncError::is_transient`.

use std::time::{Duration, SystemTime};

/// Longest server-requested delay we are willing to honor.
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub initial_delay: Duration,
    /// Cap on the computed (pre-jitter) delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), with ±25% jitter.
    ///
    /// A `Retry-After` value raises the delay to at least that many seconds,
    /// capped at 30 s.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let base_ms = self.initial_delay.as_millis() as u64;
        let backoff_ms = base_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(16)))
            .min(self.max_delay.as_millis() as u64);
        let jittered = Duration::from_millis(apply_jitter(backoff_ms));

        match retry_after_secs {
            Some(secs) => jittered.max(Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS))),
            None => jittered,
        }
    }
}

/// Parse a `Retry-After` header given in integer seconds.
/// HTTP-date values are ignored and fall back to computed backoff.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

/// Apply ±25% jitter so concurrent clients do not retry in lockstep.
fn apply_jitter(base_ms: u64) -> u64 {
    let range = (base_ms / 4) as i64;
    if range == 0 {
        return base_ms;
    }
    let offset = (clock_noise() % (2 * range + 1)) - range;
    (base_ms as i64 + offset).max(0) as u64
}

/// Jitter source from the clock's sub-second nanos.
fn clock_noise() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    i64::from(nanos % 1_000_003)
}
