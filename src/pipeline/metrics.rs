//! Pipeline counters and rolling flush timings.
//!
//! Counters are lock-free atomics updated from both the dispatcher and the
//! scheduler side; the latency window sits behind its own small mutex, off
//! the tick hot path (only the scheduler touches it).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Rolling window size for flush latency percentiles.
const LATENCY_WINDOW: usize = 256;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub ticks_received: AtomicU64,
    pub ticks_accepted: AtomicU64,
    pub ticks_rejected_stale: AtomicU64,
    pub ticks_duplicate: AtomicU64,
    pub gaps_detected: AtomicU64,

    pub updates_flushed: AtomicU64,
    pub flushes_attempted: AtomicU64,
    pub flushes_succeeded: AtomicU64,
    pub flushes_skipped_backoff: AtomicU64,
    pub sink_failures: AtomicU64,

    /// Current number of stale instruments (gauge, set by the sweep).
    pub stale_instruments: AtomicU64,
    /// Current number of live instruments (gauge).
    pub instrument_count: AtomicU64,
    /// Producer-side reconnects, if the producer exposes them.
    pub producer_reconnects: AtomicU64,

    flush_latencies: Mutex<VecDeque<Duration>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_gauge(counter: &AtomicU64, n: u64) {
        counter.store(n, Ordering::Relaxed);
    }

    pub fn record_flush_latency(&self, latency: Duration) {
        let mut window = self.flush_latencies.lock();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// Read-only view of everything, suitable for logging or the heartbeat.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (mean_ms, p95_ms) = {
            let window = self.flush_latencies.lock();
            if window.is_empty() {
                (0.0, 0.0)
            } else {
                let mut sorted: Vec<Duration> = window.iter().copied().collect();
                sorted.sort();
                let sum: Duration = sorted.iter().sum();
                let mean = sum.as_secs_f64() * 1_000.0 / sorted.len() as f64;
                let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
                let p95 = sorted[idx.min(sorted.len()) - 1].as_secs_f64() * 1_000.0;
                (mean, p95)
            }
        };

        MetricsSnapshot {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_accepted: self.ticks_accepted.load(Ordering::Relaxed),
            ticks_rejected_stale: self.ticks_rejected_stale.load(Ordering::Relaxed),
            ticks_duplicate: self.ticks_duplicate.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            updates_flushed: self.updates_flushed.load(Ordering::Relaxed),
            flushes_attempted: self.flushes_attempted.load(Ordering::Relaxed),
            flushes_succeeded: self.flushes_succeeded.load(Ordering::Relaxed),
            flushes_skipped_backoff: self.flushes_skipped_backoff.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            stale_instruments: self.stale_instruments.load(Ordering::Relaxed),
            instrument_count: self.instrument_count.load(Ordering::Relaxed),
            producer_reconnects: self.producer_reconnects.load(Ordering::Relaxed),
            flush_latency_mean_ms: mean_ms,
            flush_latency_p95_ms: p95_ms,
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_received: u64,
    pub ticks_accepted: u64,
    pub ticks_rejected_stale: u64,
    pub ticks_duplicate: u64,
    pub gaps_detected: u64,
    pub updates_flushed: u64,
    pub flushes_attempted: u64,
    pub flushes_succeeded: u64,
    pub flushes_skipped_backoff: u64,
    pub sink_failures: u64,
    pub stale_instruments: u64,
    pub instrument_count: u64,
    pub producer_reconnects: u64,
    pub flush_latency_mean_ms: f64,
    pub flush_latency_p95_ms: f64,
}
