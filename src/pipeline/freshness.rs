//! Per-symbol freshness tracking.
//!
//! `observe` is the only fresh edge, draining is the only stale edge; the
//! dispatcher observes before the scheduler drains, so the two cannot race
//! on a single symbol within one logical step.
//!
//! Transition table:
//!
//! | From              | Event                              | To                |
//! |-------------------|------------------------------------|-------------------|
//! | fresh             | silence >= threshold at drain      | stale             |
//! | stale             | any `observe`                      | recovered-pending |
//! | recovered-pending | `drain_recovered`                  | fresh             |

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Tracks last-observed times and the stale / recovered sets.
#[derive(Debug, Default)]
pub struct FreshnessTracker {
    latest_seen: HashMap<String, DateTime<Utc>>,
    stale: HashSet<String>,
    recovered: HashSet<String>,
}

impl FreshnessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh observation. A symbol flagged stale moves to the
    /// recovered-pending set, consumed once by `drain_recovered`.
    pub fn observe(&mut self, symbol: &str, exchange_time: DateTime<Utc>) {
        self.latest_seen.insert(symbol.to_string(), exchange_time);
        if self.stale.remove(symbol) {
            self.recovered.insert(symbol.to_string());
        }
    }

    /// Flag every tracked symbol silent for at least `threshold` and return
    /// a snapshot of the current stale set.
    ///
    /// The snapshot reflects current state only: a symbol whose latest
    /// observation is again within the threshold is dropped from the set
    /// rather than reported forever.
    pub fn drain_newly_stale(&mut self, threshold: Duration, now: DateTime<Utc>) -> Vec<String> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);

        let latest_seen = &self.latest_seen;
        self.stale.retain(|symbol| {
            latest_seen
                .get(symbol)
                .map(|seen| now - *seen >= threshold)
                .unwrap_or(true)
        });

        for (symbol, seen) in &self.latest_seen {
            if now - *seen >= threshold && !self.stale.contains(symbol) {
                self.stale.insert(symbol.clone());
            }
        }

        let mut snapshot: Vec<String> = self.stale.iter().cloned().collect();
        snapshot.sort();
        snapshot
    }

    /// Return and clear the recovered set. A symbol that went silent again
    /// since its recovering observation is put back in the stale set instead
    /// of being reported.
    pub fn drain_recovered(&mut self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);

        let mut out = Vec::new();
        for symbol in self.recovered.drain() {
            let silent_again = self
                .latest_seen
                .get(&symbol)
                .map(|seen| now - *seen >= threshold)
                .unwrap_or(true);
            if silent_again {
                self.stale.insert(symbol);
            } else {
                out.push(symbol);
            }
        }
        out.sort();
        out
    }

    pub fn is_stale(&self, symbol: &str) -> bool {
        self.stale.contains(symbol)
    }

    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const THRESHOLD: Duration = Duration::from_secs(5);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_314_600 + secs, 0).unwrap()
    }

    #[test]
    fn symbol_goes_stale_once_per_silence_episode() {
        let mut tracker = FreshnessTracker::new();
        tracker.observe("X", t(0));

        let stale = tracker.drain_newly_stale(THRESHOLD, t(10));
        assert_eq!(stale, vec!["X".to_string()]);

        // Still silent: present in the snapshot but not a new transition.
        let stale = tracker.drain_newly_stale(THRESHOLD, t(20));
        assert_eq!(stale, vec!["X".to_string()]);
        assert_eq!(tracker.stale_count(), 1);
    }

    #[test]
    fn observe_during_staleness_yields_one_recovery() {
        let mut tracker = FreshnessTracker::new();
        tracker.observe("X", t(0));
        tracker.drain_newly_stale(THRESHOLD, t(10));
        assert!(tracker.is_stale("X"));

        tracker.observe("X", t(11));
        assert!(!tracker.is_stale("X"));

        let recovered = tracker.drain_recovered(t(11), THRESHOLD);
        assert_eq!(recovered, vec!["X".to_string()]);

        // Consumed once.
        assert!(tracker.drain_recovered(t(11), THRESHOLD).is_empty());
    }

    #[test]
    fn fresh_symbol_never_appears_in_stale_snapshot() {
        let mut tracker = FreshnessTracker::new();
        tracker.observe("X", t(0));
        tracker.observe("Y", t(9));

        let stale = tracker.drain_newly_stale(THRESHOLD, t(10));
        assert_eq!(stale, vec!["X".to_string()]);
    }

    #[test]
    fn recovery_that_went_silent_again_returns_to_stale() {
        let mut tracker = FreshnessTracker::new();
        tracker.observe("X", t(0));
        tracker.drain_newly_stale(THRESHOLD, t(10));
        tracker.observe("X", t(11));

        // Recovered observation itself aged out before the drain ran.
        let recovered = tracker.drain_recovered(t(30), THRESHOLD);
        assert!(recovered.is_empty());
        assert!(tracker.is_stale("X"));
    }

    #[test]
    fn drain_order_is_deterministic() {
        let mut tracker = FreshnessTracker::new();
        tracker.observe("B", t(0));
        tracker.observe("A", t(0));
        let stale = tracker.drain_newly_stale(THRESHOLD, t(10));
        assert_eq!(stale, vec!["A".to_string(), "B".to_string()]);
    }
}
