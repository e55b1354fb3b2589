//! Per-symbol instrument state.
//!
//! One `InstrumentState` per observed symbol, created on first observation
//! and alive for the process lifetime. Mutated only through the dispatcher;
//! `try_update` is the single write path and enforces the timestamp and
//! sequence rules.

use chrono::{DateTime, Utc};

use crate::model::{InstrumentVariant, Quote};
use crate::pipeline::sequence::{classify, SequenceClass};

/// Why a tick was dropped without mutating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Event time strictly before the instrument's last update time.
    StaleTimestamp,
}

/// Result of offering one tick to an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Quote stored; cell writes should be emitted.
    Accepted {
        class: SequenceClass,
        gap_count: u64,
    },
    /// Same sequence seen again; timestamp check passed but nothing mutates
    /// and no cell writes are emitted.
    Duplicate,
    /// Tick dropped, state untouched.
    Rejected(RejectReason),
}

impl TickOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Mutable per-symbol aggregate.
#[derive(Debug, Clone)]
pub struct InstrumentState {
    symbol: String,
    variant: InstrumentVariant,
    row_index: u32,
    last_quote: Option<Quote>,
    last_update_time: Option<DateTime<Utc>>,
    last_sequence: Option<i64>,
    gap_count: u64,
    stale: bool,
}

impl InstrumentState {
    /// Create a fresh instrument bound to a spreadsheet row.
    ///
    /// `row_index` must be >= 2 and unique across live instruments; the
    /// dispatcher owns the assignment.
    pub fn new(symbol: impl Into<String>, row_index: u32) -> Self {
        let symbol = symbol.into();
        debug_assert!(!symbol.is_empty(), "instrument symbol must be non-empty");
        debug_assert!(row_index >= crate::model::FIRST_DATA_ROW);
        let variant = InstrumentVariant::from_symbol(&symbol);
        Self {
            symbol,
            variant,
            row_index,
            last_quote: None,
            last_update_time: None,
            last_sequence: None,
            gap_count: 0,
            stale: false,
        }
    }

    /// Offer one tick. See `TickOutcome` for the three exits.
    ///
    /// Equal timestamps are accepted — cotemporal events are the defined
    /// policy, only a strictly older event time rejects. Duplicates do not
    /// rewind `last_sequence`; gaps set it to the observed value.
    pub fn try_update(&mut self, quote: Quote, sequence: i64) -> TickOutcome {
        if let Some(last) = self.last_update_time {
            if quote.event_time < last {
                return TickOutcome::Rejected(RejectReason::StaleTimestamp);
            }
        }

        let class = classify(self.last_sequence, sequence);
        match class {
            SequenceClass::Duplicate => return TickOutcome::Duplicate,
            SequenceClass::Gap => self.gap_count += 1,
            SequenceClass::First | SequenceClass::InOrder | SequenceClass::NoSequence => {}
        }

        let quote = quote.sanitize();
        self.last_update_time = Some(quote.event_time);
        if class != SequenceClass::NoSequence {
            self.last_sequence = Some(sequence);
        }
        self.last_quote = Some(quote);

        TickOutcome::Accepted {
            class,
            gap_count: self.gap_count,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn variant(&self) -> InstrumentVariant {
        self.variant
    }

    pub fn row_index(&self) -> u32 {
        self.row_index
    }

    pub fn last_quote(&self) -> Option<&Quote> {
        self.last_quote.as_ref()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_update_time
    }

    pub fn last_sequence(&self) -> Option<i64> {
        self.last_sequence
    }

    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_314_600 + secs, 0).unwrap()
    }

    fn quote_at(secs: i64, last: f64) -> Quote {
        Quote {
            last: Some(last),
            event_time: t(secs),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_in_order_and_tracks_sequence() {
        let mut inst = InstrumentState::new("GGAL", 2);
        assert!(inst.try_update(quote_at(0, 100.0), 1).is_accepted());
        let out = inst.try_update(quote_at(1, 101.0), 2);
        assert_eq!(
            out,
            TickOutcome::Accepted {
                class: SequenceClass::InOrder,
                gap_count: 0
            }
        );
        assert_eq!(inst.last_sequence(), Some(2));
        assert_eq!(inst.last_update_time(), Some(t(1)));
        assert_eq!(inst.last_quote().unwrap().last, Some(101.0));
    }

    #[test]
    fn rejects_older_timestamp_without_mutation() {
        let mut inst = InstrumentState::new("GGAL", 2);
        inst.try_update(quote_at(10, 100.0), 2);
        let before = inst.clone();

        let out = inst.try_update(quote_at(0, 99.0), 1);
        assert_eq!(out, TickOutcome::Rejected(RejectReason::StaleTimestamp));
        assert_eq!(inst.last_update_time(), before.last_update_time());
        assert_eq!(inst.last_sequence(), before.last_sequence());
        assert_eq!(inst.gap_count(), before.gap_count());
        assert_eq!(inst.last_quote().unwrap().last, Some(100.0));
    }

    #[test]
    fn accepts_equal_timestamp() {
        let mut inst = InstrumentState::new("GGAL", 2);
        inst.try_update(quote_at(5, 100.0), 1);
        assert!(inst.try_update(quote_at(5, 100.5), 2).is_accepted());
    }

    #[test]
    fn duplicate_sequence_mutates_nothing() {
        let mut inst = InstrumentState::new("GGAL", 2);
        inst.try_update(quote_at(0, 100.0), 3);
        let out = inst.try_update(quote_at(1, 105.0), 3);
        assert_eq!(out, TickOutcome::Duplicate);
        assert_eq!(inst.last_sequence(), Some(3));
        assert_eq!(inst.last_quote().unwrap().last, Some(100.0));
    }

    #[test]
    fn gap_increments_count_and_jumps_cursor() {
        let mut inst = InstrumentState::new("GGAL", 2);
        inst.try_update(quote_at(0, 100.0), 5);
        let out = inst.try_update(quote_at(1, 101.0), 10);
        assert_eq!(
            out,
            TickOutcome::Accepted {
                class: SequenceClass::Gap,
                gap_count: 1
            }
        );
        assert_eq!(inst.last_sequence(), Some(10));

        // Rewind is also a gap; cursor moves to the observed value.
        let out = inst.try_update(quote_at(2, 102.0), 4);
        assert_eq!(
            out,
            TickOutcome::Accepted {
                class: SequenceClass::Gap,
                gap_count: 2
            }
        );
        assert_eq!(inst.last_sequence(), Some(4));
    }

    #[test]
    fn no_sequence_bypasses_gap_accounting() {
        let mut inst = InstrumentState::new("GGAL", 2);
        inst.try_update(quote_at(0, 100.0), 5);
        let out = inst.try_update(quote_at(1, 101.0), -1);
        assert_eq!(
            out,
            TickOutcome::Accepted {
                class: SequenceClass::NoSequence,
                gap_count: 0
            }
        );
        // Cursor untouched by unsequenced ticks.
        assert_eq!(inst.last_sequence(), Some(5));
    }

    #[test]
    fn stored_quote_is_sanitized() {
        let mut inst = InstrumentState::new("GGAL", 2);
        let q = Quote {
            bid: Some(-3.0),
            change: Some(-1.5),
            event_time: t(0),
            ..Default::default()
        };
        inst.try_update(q, 1);
        let stored = inst.last_quote().unwrap();
        assert_eq!(stored.bid, None);
        assert_eq!(stored.change, Some(-1.5));
    }

    #[test]
    fn update_time_is_monotone_under_replay() {
        // Arbitrary interleavings never decrease last_update_time.
        let mut inst = InstrumentState::new("GGAL", 2);
        let offsets = [5i64, 2, 8, 8, 1, 12, 3, 12];
        let mut high_water = None;
        for (i, secs) in offsets.into_iter().enumerate() {
            inst.try_update(quote_at(secs, 100.0), i as i64 + 1);
            let now = inst.last_update_time();
            assert!(now >= high_water);
            high_water = now;
        }
    }
}
