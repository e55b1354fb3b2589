//! Tick dispatcher: the producer-facing entry point.
//!
//! One `process` call validates the tick, updates the per-symbol state,
//! freshness and retention tracking, and enqueues cell updates into the
//! coalescing buffer. The whole step runs under one short-held mutex so the
//! state invariants hold per symbol regardless of how many producer tasks
//! call in. The dispatcher path is synchronous and never waits on the sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::model::{
    CellAddress, CellUpdate, CellValue, Column, Quote, FIRST_DATA_ROW,
};
use crate::pipeline::buffer::CoalescingBuffer;
use crate::pipeline::freshness::FreshnessTracker;
use crate::pipeline::instrument::{InstrumentState, RejectReason, TickOutcome};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::policy::BatchPolicy;
use crate::pipeline::retention::RetentionStore;
use crate::pipeline::sequence::SequenceClass;

// =============================================================================
// Registry
// =============================================================================

/// State behind the dispatcher mutex: the instrument registry plus the
/// retention, freshness and policy aggregates that each step touches.
struct DispatcherInner {
    instruments: HashMap<String, InstrumentState>,
    /// Next spreadsheet row to hand out. Insertion-order, stable, never
    /// reshuffled at runtime.
    next_row: u32,
    retention: RetentionStore,
    freshness: FreshnessTracker,
    policy: BatchPolicy,
}

impl DispatcherInner {
    /// Resolve or create the instrument for `symbol`, assigning a row on
    /// first observation.
    fn resolve(&mut self, symbol: &str) -> &mut InstrumentState {
        let next_row = &mut self.next_row;
        self.instruments
            .entry(symbol.to_string())
            .or_insert_with(|| {
                let row = *next_row;
                *next_row += 1;
                info!(symbol = %symbol, row, "new instrument registered");
                InstrumentState::new(symbol, row)
            })
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct TickDispatcher {
    inner: Mutex<DispatcherInner>,
    buffer: Arc<CoalescingBuffer>,
    metrics: Arc<PipelineMetrics>,
    stale_threshold: std::time::Duration,
}

impl TickDispatcher {
    pub fn new(
        config: &PipelineConfig,
        buffer: Arc<CoalescingBuffer>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            inner: Mutex::new(DispatcherInner {
                instruments: HashMap::new(),
                next_row: FIRST_DATA_ROW,
                retention: RetentionStore::new(
                    config.max_ticks_per_symbol,
                    config.retention_window,
                ),
                freshness: FreshnessTracker::new(),
                policy: BatchPolicy::new(
                    config.batch_high_watermark,
                    config.batch_max_age,
                    config.priority_symbols.clone(),
                ),
            }),
            buffer,
            metrics,
            stale_threshold: config.stale_threshold,
        }
    }

    /// Process one tick from a producer. `sequence == -1` means the producer
    /// supplied no sequence.
    ///
    /// The defined reject cases come back as `TickOutcome`; anything else —
    /// here, an empty symbol — is an error the producer must handle.
    pub fn process(&self, symbol: &str, quote: Quote, sequence: i64) -> Result<TickOutcome> {
        if symbol.trim().is_empty() {
            bail!("tick delivered with an empty symbol");
        }

        PipelineMetrics::incr(&self.metrics.ticks_received);
        let event_time = quote.event_time;

        let mut inner = self.inner.lock();
        let instrument = inner.resolve(symbol);
        let outcome = instrument.try_update(quote, sequence);

        match outcome {
            TickOutcome::Rejected(RejectReason::StaleTimestamp) => {
                PipelineMetrics::incr(&self.metrics.ticks_rejected_stale);
                trace!(symbol = %symbol, event_time = %event_time, "dropped tick with stale timestamp");
                return Ok(outcome);
            }
            TickOutcome::Duplicate => {
                PipelineMetrics::incr(&self.metrics.ticks_duplicate);
                debug!(symbol = %symbol, sequence, "dropped duplicate sequence");
                return Ok(outcome);
            }
            TickOutcome::Accepted { class, gap_count } => {
                if class == SequenceClass::Gap {
                    PipelineMetrics::incr(&self.metrics.gaps_detected);
                    warn!(symbol = %symbol, sequence, gap_count, "sequence gap detected");
                }
            }
        }

        PipelineMetrics::incr(&self.metrics.ticks_accepted);

        let instrument = &inner.instruments[symbol];
        let updates = match instrument.last_quote() {
            Some(quote) => Self::cell_updates_for(instrument, quote),
            None => Vec::new(),
        };

        inner.freshness.observe(symbol, event_time);
        inner.retention.on_new_tick(symbol, sequence, event_time);
        inner.policy.record(symbol, Instant::now());
        PipelineMetrics::set_gauge(
            &self.metrics.instrument_count,
            inner.instruments.len() as u64,
        );

        // Enqueued inside the critical section so concurrent producers cannot
        // publish an older tick's cells after a newer tick's.
        self.buffer.enqueue_all(updates);

        Ok(outcome)
    }

    /// Cell writes for one freshly accepted tick: every present market-data
    /// field plus the management cells, all at the instrument's row.
    fn cell_updates_for(instrument: &InstrumentState, quote: &Quote) -> Vec<CellUpdate> {
        let row = instrument.row_index();

        let mut updates = Vec::with_capacity(16);
        let mut push = |column: Column, value: CellValue| {
            updates.push(CellUpdate::new(CellAddress::market_data(column, row), value));
        };

        // Management cells always refresh.
        push(Column::Symbol, CellValue::Text(instrument.symbol().to_string()));
        push(Column::LastUpdate, CellValue::Instant(quote.event_time));
        push(Column::IsStale, CellValue::Boolean(instrument.is_stale()));
        push(
            Column::GapCount,
            CellValue::Integer(instrument.gap_count() as i64),
        );
        push(
            Column::Sequence,
            match instrument.last_sequence() {
                Some(seq) => CellValue::Integer(seq),
                None => CellValue::Absent,
            },
        );

        // Market-data cells only where the field is present.
        let mut push_decimal = |column: Column, field: Option<f64>| {
            if let Some(v) = field {
                updates.push(CellUpdate::new(
                    CellAddress::market_data(column, row),
                    CellValue::Decimal(v),
                ));
            }
        };
        push_decimal(Column::Last, quote.last);
        push_decimal(Column::Bid, quote.bid);
        push_decimal(Column::Ask, quote.ask);
        push_decimal(Column::BidSize, quote.bid_size);
        push_decimal(Column::AskSize, quote.ask_size);
        push_decimal(Column::Change, quote.change);
        push_decimal(Column::Open, quote.open);
        push_decimal(Column::High, quote.high);
        push_decimal(Column::Low, quote.low);

        if let Some(v) = quote.volume {
            updates.push(CellUpdate::new(
                CellAddress::market_data(Column::Volume, row),
                CellValue::Integer(v as i64),
            ));
        }
        updates.push(CellUpdate::new(
            CellAddress::market_data(Column::Timestamp, row),
            CellValue::Instant(quote.event_time),
        ));

        updates
    }

    // =========================================================================
    // Scheduler-facing operations
    // =========================================================================

    /// Policy consultation for the flush scheduler.
    pub fn should_flush(&self, now: Instant) -> bool {
        self.inner.lock().policy.should_flush(now)
    }

    /// Reset the batch policy after a successful sink call.
    pub fn reset_policy(&self) {
        self.inner.lock().policy.reset();
    }

    /// Run one staleness sweep: flag silent instruments, un-flag recovered
    /// ones, and enqueue the corresponding `IsStale` cells.
    pub fn sweep_staleness(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let mut updates = Vec::new();

        let recovered = inner.freshness.drain_recovered(now, self.stale_threshold);
        for symbol in recovered {
            if let Some(instrument) = inner.instruments.get_mut(&symbol) {
                if instrument.is_stale() {
                    instrument.set_stale(false);
                    info!(symbol = %symbol, "instrument recovered");
                    updates.push(CellUpdate::new(
                        CellAddress::market_data(Column::IsStale, instrument.row_index()),
                        CellValue::Boolean(false),
                    ));
                }
            }
        }

        let stale_now = inner.freshness.drain_newly_stale(self.stale_threshold, now);
        for symbol in &stale_now {
            if let Some(instrument) = inner.instruments.get_mut(symbol) {
                if !instrument.is_stale() {
                    instrument.set_stale(true);
                    warn!(symbol = %symbol, "instrument went stale");
                    updates.push(CellUpdate::new(
                        CellAddress::market_data(Column::IsStale, instrument.row_index()),
                        CellValue::Boolean(true),
                    ));
                }
            }
        }

        PipelineMetrics::set_gauge(&self.metrics.stale_instruments, stale_now.len() as u64);

        if !updates.is_empty() {
            // Same critical section as `process` to keep IsStale cells ordered.
            self.buffer.enqueue_all(updates);
        }
        drop(inner);
    }

    /// Enqueue the heartbeat row on the metrics sheet: cumulative counters
    /// plus the latest retention figures.
    pub fn queue_heartbeat(&self, now: DateTime<Utc>) {
        let snapshot = self.metrics.snapshot();
        let inner = self.inner.lock();
        let retention_evicted = inner.retention.total_evicted();
        let retention_last_time = inner.retention.last_eviction_time();
        let retention_last_batch = inner.retention.last_eviction_batch();
        drop(inner);

        let mut updates = Vec::with_capacity(8);
        let mut push = |column: Column, value: CellValue| {
            updates.push(CellUpdate::new(CellAddress::metrics(column), value));
        };
        push(Column::Timestamp, CellValue::Instant(now));
        push(
            Column::TotalQuotes,
            CellValue::Integer(snapshot.ticks_received as i64),
        );
        push(
            Column::TotalGaps,
            CellValue::Integer(snapshot.gaps_detected as i64),
        );
        push(
            Column::StaleCount,
            CellValue::Integer(snapshot.stale_instruments as i64),
        );
        push(
            Column::InstrumentCount,
            CellValue::Integer(snapshot.instrument_count as i64),
        );
        push(
            Column::RetentionTotalEvicted,
            CellValue::Integer(retention_evicted as i64),
        );
        push(
            Column::RetentionLastEvictionUtc,
            match retention_last_time {
                Some(at) => CellValue::Instant(at),
                None => CellValue::Absent,
            },
        );
        push(
            Column::RetentionLastBatchEvicted,
            CellValue::Integer(retention_last_batch as i64),
        );

        self.buffer.enqueue_all(updates);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Clone of one instrument's state, for tests and diagnostics.
    pub fn instrument(&self, symbol: &str) -> Option<InstrumentState> {
        self.inner.lock().instruments.get(symbol).cloned()
    }

    pub fn instrument_count(&self) -> usize {
        self.inner.lock().instruments.len()
    }

    /// Retention queue length for one symbol.
    pub fn retention_len(&self, symbol: &str) -> usize {
        self.inner.lock().retention.len(symbol)
    }
}
