//! Pipeline configuration.
//!
//! Defaults per the operating contract, overridable via `TICKSHEET_*`
//! environment variables (durations in milliseconds). Every option is
//! range-checked at startup; an out-of-range value is a configuration
//! error and the process refuses to start.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Silence after which an instrument is flagged stale.
    #[serde(with = "duration_ms")]
    pub stale_threshold: Duration,
    /// Accumulated updates that force a flush.
    pub batch_high_watermark: usize,
    /// Oldest pending update age that forces a flush. Must stay strictly
    /// below `stale_threshold` or staleness could be caused by buffering.
    #[serde(with = "duration_ms")]
    pub batch_max_age: Duration,
    /// Retention queue length bound per symbol.
    pub max_ticks_per_symbol: usize,
    /// Retention queue age bound.
    #[serde(with = "duration_ms")]
    pub retention_window: Duration,
    /// Symbols whose updates flush immediately.
    pub priority_symbols: HashSet<String>,
    /// Scheduler tick period.
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,
    /// Heartbeat row period.
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Backoff gate base delay.
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,
    /// Backoff gate delay clamp.
    #[serde(with = "duration_ms")]
    pub backoff_max: Duration,
    /// Bound on the final flush during shutdown.
    #[serde(with = "duration_ms")]
    pub shutdown_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(5),
            batch_high_watermark: 100,
            batch_max_age: Duration::from_secs(1),
            max_ticks_per_symbol: 100,
            retention_window: Duration::from_secs(300),
            priority_symbols: HashSet::new(),
            flush_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(1),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            shutdown_deadline: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `TICKSHEET_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(ms) = env_ms("TICKSHEET_STALE_THRESHOLD_MS") {
            cfg.stale_threshold = ms;
        }
        if let Ok(v) = env::var("TICKSHEET_BATCH_HIGH_WATERMARK") {
            if let Ok(n) = v.parse() {
                cfg.batch_high_watermark = n;
            }
        }
        if let Some(ms) = env_ms("TICKSHEET_BATCH_MAX_AGE_MS") {
            cfg.batch_max_age = ms;
        }
        if let Ok(v) = env::var("TICKSHEET_MAX_TICKS_PER_SYMBOL") {
            if let Ok(n) = v.parse() {
                cfg.max_ticks_per_symbol = n;
            }
        }
        if let Some(ms) = env_ms("TICKSHEET_RETENTION_WINDOW_MS") {
            cfg.retention_window = ms;
        }
        if let Ok(v) = env::var("TICKSHEET_PRIORITY_SYMBOLS") {
            cfg.priority_symbols = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(ms) = env_ms("TICKSHEET_FLUSH_INTERVAL_MS") {
            cfg.flush_interval = ms;
        }
        if let Some(ms) = env_ms("TICKSHEET_HEARTBEAT_INTERVAL_MS") {
            cfg.heartbeat_interval = ms;
        }
        if let Some(ms) = env_ms("TICKSHEET_BACKOFF_BASE_MS") {
            cfg.backoff_base = ms;
        }
        if let Some(ms) = env_ms("TICKSHEET_BACKOFF_MAX_MS") {
            cfg.backoff_max = ms;
        }
        if let Some(ms) = env_ms("TICKSHEET_SHUTDOWN_DEADLINE_MS") {
            cfg.shutdown_deadline = ms;
        }

        cfg
    }

    /// Range-check every option. Violations refuse startup (exit code 2).
    pub fn validate(&self) -> Result<()> {
        check_range(
            "stale_threshold",
            self.stale_threshold,
            Duration::from_secs(1),
            Duration::from_secs(300),
        )?;
        if !(1..=10_000).contains(&self.batch_high_watermark) {
            bail!(
                "batch_high_watermark {} outside [1, 10000]",
                self.batch_high_watermark
            );
        }
        check_range(
            "batch_max_age",
            self.batch_max_age,
            Duration::from_millis(10),
            Duration::from_secs(60),
        )?;
        if self.batch_max_age >= self.stale_threshold {
            bail!(
                "batch_max_age ({:?}) must be strictly less than stale_threshold ({:?})",
                self.batch_max_age,
                self.stale_threshold
            );
        }
        if !(1..=1_000).contains(&self.max_ticks_per_symbol) {
            bail!(
                "max_ticks_per_symbol {} outside [1, 1000]",
                self.max_ticks_per_symbol
            );
        }
        check_range(
            "retention_window",
            self.retention_window,
            Duration::from_secs(60),
            Duration::from_secs(36_000),
        )?;
        if self.flush_interval.is_zero() {
            bail!("flush_interval must be positive");
        }
        if self.heartbeat_interval.is_zero() {
            bail!("heartbeat_interval must be positive");
        }
        if self.backoff_base.is_zero() || self.backoff_max < self.backoff_base {
            bail!(
                "backoff delays invalid: base {:?}, max {:?}",
                self.backoff_base,
                self.backoff_max
            );
        }
        if self.shutdown_deadline.is_zero() {
            bail!("shutdown_deadline must be positive");
        }
        Ok(())
    }
}

fn check_range(name: &str, value: Duration, min: Duration, max: Duration) -> Result<()> {
    if value < min || value > max {
        bail!("{} {:?} outside [{:?}, {:?}]", name, value, min, max);
    }
    Ok(())
}

fn env_ms(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
