//! Coalescing update buffer.
//!
//! The single interchange between the dispatcher and the flush scheduler.
//! Keyed by cell address with last-write-wins replacement: an instrument
//! emitting 100 ticks per cell between two flushes contributes exactly one
//! write per cell to the flush. Enqueue and drain are mutually exclusive and
//! atomic behind a short-held mutex.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::model::{CellAddress, CellUpdate};

#[derive(Debug, Default)]
struct BufferInner {
    pending: HashMap<CellAddress, CellUpdate>,
    /// Set on the first insertion after a drain.
    oldest_enqueued_at: Option<Instant>,
}

/// Keyed pending-write store: address -> latest value.
#[derive(Debug, Default)]
pub struct CoalescingBuffer {
    inner: Mutex<BufferInner>,
}

impl CoalescingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pending value at the update's address.
    pub fn enqueue(&self, update: CellUpdate) {
        let mut inner = self.inner.lock();
        if inner.oldest_enqueued_at.is_none() {
            inner.oldest_enqueued_at = Some(Instant::now());
        }
        inner.pending.insert(update.address, update);
    }

    /// Enqueue a batch under one lock acquisition.
    pub fn enqueue_all(&self, updates: impl IntoIterator<Item = CellUpdate>) {
        let mut inner = self.inner.lock();
        for update in updates {
            if inner.oldest_enqueued_at.is_none() {
                inner.oldest_enqueued_at = Some(Instant::now());
            }
            inner.pending.insert(update.address, update);
        }
    }

    /// Take everything currently pending and clear the store.
    ///
    /// Entry order is arbitrary; correctness is keyed, not ordered.
    pub fn drain(&self) -> Vec<CellUpdate> {
        let mut inner = self.inner.lock();
        inner.oldest_enqueued_at = None;
        inner.pending.drain().map(|(_, update)| update).collect()
    }

    /// Put a failed batch back without clobbering fresher values.
    ///
    /// Only addresses with no newer pending entry are restored, so a symbol
    /// that kept ticking during the failed sink call keeps its latest value
    /// and a quiet symbol's last value is not lost.
    pub fn restore(&self, batch: Vec<CellUpdate>) {
        let mut inner = self.inner.lock();
        for update in batch {
            if inner.oldest_enqueued_at.is_none() {
                inner.oldest_enqueued_at = Some(Instant::now());
            }
            inner.pending.entry(update.address).or_insert(update);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Age reference of the oldest pending write, if any.
    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.inner.lock().oldest_enqueued_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellValue, Column};

    fn update(column: Column, row: u32, value: f64) -> CellUpdate {
        CellUpdate::new(
            CellAddress::market_data(column, row),
            CellValue::Decimal(value),
        )
    }

    #[test]
    fn last_write_wins_per_address() {
        let buffer = CoalescingBuffer::new();
        for i in 0..100 {
            buffer.enqueue(update(Column::Last, 2, 100.0 + i as f64));
        }
        assert_eq!(buffer.len(), 1);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].value, CellValue::Decimal(199.0));
    }

    #[test]
    fn distinct_addresses_do_not_coalesce() {
        let buffer = CoalescingBuffer::new();
        buffer.enqueue(update(Column::Last, 2, 1.0));
        buffer.enqueue(update(Column::Bid, 2, 2.0));
        buffer.enqueue(update(Column::Last, 3, 3.0));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn drain_clears_store_and_age_marker() {
        let buffer = CoalescingBuffer::new();
        buffer.enqueue(update(Column::Last, 2, 1.0));
        assert!(buffer.oldest_enqueued_at().is_some());

        buffer.drain();
        assert!(buffer.is_empty());
        assert!(buffer.oldest_enqueued_at().is_none());

        // First insert after a drain re-arms the marker.
        buffer.enqueue(update(Column::Last, 2, 2.0));
        assert!(buffer.oldest_enqueued_at().is_some());
    }

    #[test]
    fn restore_does_not_clobber_newer_values() {
        let buffer = CoalescingBuffer::new();
        buffer.enqueue(update(Column::Last, 2, 1.0));
        buffer.enqueue(update(Column::Bid, 2, 5.0));

        let batch = buffer.drain();
        assert!(buffer.is_empty());

        // A fresher tick lands while the sink call is failing.
        buffer.enqueue(update(Column::Last, 2, 9.0));

        buffer.restore(batch);
        let mut drained = buffer.drain();
        drained.sort_by_key(|u| u.address.column.as_str());

        assert_eq!(drained.len(), 2);
        let last = drained
            .iter()
            .find(|u| u.address.column == Column::Last)
            .unwrap();
        assert_eq!(last.value, CellValue::Decimal(9.0));
        let bid = drained
            .iter()
            .find(|u| u.address.column == Column::Bid)
            .unwrap();
        assert_eq!(bid.value, CellValue::Decimal(5.0));
    }

    #[test]
    fn no_update_lost_across_interleaved_drain() {
        // Drain atomicity at the API level: everything enqueued is either in
        // this drain or the next, never dropped or duplicated.
        let buffer = CoalescingBuffer::new();
        buffer.enqueue(update(Column::Last, 2, 1.0));
        let first = buffer.drain();
        buffer.enqueue(update(Column::Last, 3, 2.0));
        let second = buffer.drain();

        assert_eq!(first.len() + second.len(), 2);
        assert!(buffer.is_empty());
    }
}
