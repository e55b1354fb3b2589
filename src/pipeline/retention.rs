//! Bounded per-symbol retention of tick metadata.
//!
//! Keeps a short FIFO of `(sequence, event_time)` per symbol so the
//! heartbeat can report how much history is being held and how much has
//! aged out. Both bounds — entry count and entry age — are enforced on
//! every call; either alone can cause eviction.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// What a single `on_new_tick` call did, plus running totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub evicted_this_call: usize,
    pub current_len: usize,
    pub total_evicted: u64,
    pub last_eviction_time: Option<DateTime<Utc>>,
    pub last_eviction_batch: usize,
}

/// Per-symbol FIFO queues with dual count+age eviction.
#[derive(Debug)]
pub struct RetentionStore {
    queues: HashMap<String, VecDeque<(i64, DateTime<Utc>)>>,
    max_ticks_per_symbol: usize,
    retention_window: chrono::Duration,
    total_evicted: u64,
    last_eviction_time: Option<DateTime<Utc>>,
    last_eviction_batch: usize,
}

impl RetentionStore {
    pub fn new(max_ticks_per_symbol: usize, retention_window: Duration) -> Self {
        Self {
            queues: HashMap::new(),
            max_ticks_per_symbol,
            retention_window: chrono::Duration::from_std(retention_window)
                .unwrap_or(chrono::Duration::MAX),
            total_evicted: 0,
            last_eviction_time: None,
            last_eviction_batch: 0,
        }
    }

    /// Append one tick, then evict from the head while either bound is
    /// violated. The new tick's event time is the age reference.
    pub fn on_new_tick(
        &mut self,
        symbol: &str,
        sequence: i64,
        event_time: DateTime<Utc>,
    ) -> RetentionReport {
        let queue = self.queues.entry(symbol.to_string()).or_default();
        queue.push_back((sequence, event_time));

        let mut evicted = 0usize;
        while let Some(&(_, head_time)) = queue.front() {
            let over_count = queue.len() > self.max_ticks_per_symbol;
            let over_age = event_time - head_time > self.retention_window;
            if !(over_count || over_age) {
                break;
            }
            queue.pop_front();
            evicted += 1;
        }

        if evicted > 0 {
            self.total_evicted += evicted as u64;
            self.last_eviction_time = Some(event_time);
            self.last_eviction_batch = evicted;
        }

        RetentionReport {
            evicted_this_call: evicted,
            current_len: queue.len(),
            total_evicted: self.total_evicted,
            last_eviction_time: self.last_eviction_time,
            last_eviction_batch: self.last_eviction_batch,
        }
    }

    /// Queue length for one symbol.
    pub fn len(&self, symbol: &str) -> usize {
        self.queues.get(symbol).map(VecDeque::len).unwrap_or(0)
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }

    pub fn last_eviction_time(&self) -> Option<DateTime<Utc>> {
        self.last_eviction_time
    }

    pub fn last_eviction_batch(&self) -> usize {
        self.last_eviction_batch
    }
}
