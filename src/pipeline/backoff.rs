//! Exponential-backoff gate in front of the sink.
//!
//! The gate short-circuits sink calls during an outage so the scheduler
//! keeps its cadence and the producer never notices. State lives entirely
//! on the scheduler task; no synchronization needed.

use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Emit a WARN every Nth failure once past the first few, instead of one
/// line per retry.
const LOG_EVERY_N_FAILURES: u32 = 10;

#[derive(Debug)]
pub struct BackoffGate {
    base_delay: Duration,
    max_delay: Duration,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

impl BackoffGate {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            consecutive_failures: 0,
            last_failure_at: None,
        }
    }

    /// Delay currently imposed: `base * 2^(failures-1)` clamped to max.
    pub fn current_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exp = self.consecutive_failures.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Whether a sink call may proceed at `now`.
    pub fn is_open(&self, now: Instant) -> bool {
        match self.last_failure_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.current_delay(),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failed sink call and log per the cadence: first failure
    /// WARN with the next delay, failures 2-3 INFO, then every Nth WARN.
    pub fn record_failure(&mut self, now: Instant, error: &anyhow::Error) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        let delay = self.current_delay();

        match self.consecutive_failures {
            1 => warn!(
                error = %error,
                next_delay_ms = delay.as_millis() as u64,
                "sink write failed, entering backoff"
            ),
            2..=3 => info!(
                error = %error,
                failures = self.consecutive_failures,
                next_delay_ms = delay.as_millis() as u64,
                "sink still failing"
            ),
            n if n % LOG_EVERY_N_FAILURES == 0 => warn!(
                error = %error,
                failures = n,
                next_delay_ms = delay.as_millis() as u64,
                "sink outage continues"
            ),
            _ => {}
        }
    }

    /// Record a successful sink call; logs once if it ends an outage.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                failures_recovered = self.consecutive_failures,
                "sink recovered"
            );
        }
        self.consecutive_failures = 0;
        self.last_failure_at = None;
    }
}
