//! Flush batch policy.
//!
//! Pure state deciding *when* the coalescing buffer should flush; it never
//! touches the buffer itself. Three rules, any of which triggers a flush:
//!
//! - count: accumulated updates since the last reset reached the watermark;
//! - age: the first update since the last reset is older than `max_age`;
//! - priority: an update for a priority symbol arrived since the last reset.
//!
//! Within one reset cycle the decision is monotone — once `should_flush`
//! turns true it stays true until `reset`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct BatchPolicy {
    high_watermark: usize,
    max_age: Duration,
    priority_symbols: HashSet<String>,

    accumulated: usize,
    first_recorded_at: Option<Instant>,
    priority_hit: bool,
}

impl BatchPolicy {
    pub fn new(
        high_watermark: usize,
        max_age: Duration,
        priority_symbols: HashSet<String>,
    ) -> Self {
        Self {
            high_watermark,
            max_age,
            priority_symbols,
            accumulated: 0,
            first_recorded_at: None,
            priority_hit: false,
        }
    }

    /// Record one accepted tick for `symbol`.
    pub fn record(&mut self, symbol: &str, now: Instant) {
        self.accumulated += 1;
        if self.first_recorded_at.is_none() {
            self.first_recorded_at = Some(now);
        }
        if !self.priority_hit && self.priority_symbols.contains(symbol) {
            self.priority_hit = true;
        }
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        if self.priority_hit {
            return true;
        }
        if self.accumulated >= self.high_watermark {
            return true;
        }
        match self.first_recorded_at {
            Some(first) => now.saturating_duration_since(first) >= self.max_age,
            None => false,
        }
    }

    /// Return to the "no quotes since flush" state.
    pub fn reset(&mut self) {
        self.accumulated = 0;
        self.first_recorded_at = None;
        self.priority_hit = false;
    }

    pub fn accumulated(&self) -> usize {
        self.accumulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(watermark: usize, max_age_ms: u64) -> BatchPolicy {
        BatchPolicy::new(
            watermark,
            Duration::from_millis(max_age_ms),
            HashSet::new(),
        )
    }

    #[test]
    fn count_rule_triggers_at_watermark() {
        let mut p = policy(3, 60_000);
        let now = Instant::now();
        p.record("X", now);
        p.record("X", now);
        assert!(!p.should_flush(now));
        p.record("X", now);
        assert!(p.should_flush(now));
    }

    #[test]
    fn age_rule_triggers_after_max_age() {
        let mut p = policy(1000, 1_000);
        let t0 = Instant::now();
        p.record("X", t0);
        assert!(!p.should_flush(t0));
        assert!(!p.should_flush(t0 + Duration::from_millis(999)));
        assert!(p.should_flush(t0 + Duration::from_millis(1_000)));
    }

    #[test]
    fn priority_rule_triggers_immediately() {
        let mut p = BatchPolicy::new(
            1000,
            Duration::from_secs(60),
            ["GGAL".to_string()].into_iter().collect(),
        );
        let now = Instant::now();
        p.record("YPFD", now);
        assert!(!p.should_flush(now));
        p.record("GGAL", now);
        assert!(p.should_flush(now));
    }

    #[test]
    fn empty_cycle_never_flushes() {
        let p = policy(1, 10);
        assert!(!p.should_flush(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn decision_is_monotone_within_a_cycle() {
        // Property: once true at t, true for all t' >= t until reset.
        let mut p = policy(1000, 500);
        let t0 = Instant::now();
        p.record("X", t0);

        let first_true = t0 + Duration::from_millis(500);
        assert!(p.should_flush(first_true));
        for extra_ms in [1u64, 10, 100, 10_000] {
            assert!(p.should_flush(first_true + Duration::from_millis(extra_ms)));
        }

        p.reset();
        assert!(!p.should_flush(first_true + Duration::from_secs(60)));
    }

    #[test]
    fn reset_clears_all_three_rules() {
        let mut p = BatchPolicy::new(
            2,
            Duration::from_millis(100),
            ["GGAL".to_string()].into_iter().collect(),
        );
        let t0 = Instant::now();
        p.record("GGAL", t0);
        p.record("GGAL", t0);
        assert!(p.should_flush(t0));

        p.reset();
        assert_eq!(p.accumulated(), 0);
        assert!(!p.should_flush(t0 + Duration::from_millis(50)));
    }
}
