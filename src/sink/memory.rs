//! In-memory recorder sink.
//!
//! Records every batch and keeps a per-address latest-value view. Failure
//! injection makes it the test double for outage scenarios; the pipeline
//! never knows the difference.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{CellAddress, CellUpdate, CellValue};
use crate::sink::CellSink;

#[derive(Debug, Default)]
pub struct MemorySink {
    cells: Mutex<HashMap<CellAddress, CellValue>>,
    batches: Mutex<Vec<Vec<CellUpdate>>>,
    /// Remaining write calls that should fail.
    fail_remaining: AtomicU32,
    writes_accepted: AtomicU64,
    writes_rejected: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write calls fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Latest value written to one cell.
    pub fn cell(&self, address: &CellAddress) -> Option<CellValue> {
        self.cells.lock().get(address).cloned()
    }

    /// Every batch accepted, in arrival order.
    pub fn batches(&self) -> Vec<Vec<CellUpdate>> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Total cell writes accepted across all batches.
    pub fn writes_accepted(&self) -> u64 {
        self.writes_accepted.load(Ordering::SeqCst)
    }

    pub fn writes_rejected(&self) -> u64 {
        self.writes_rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CellSink for MemorySink {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn write_batch(&self, batch: &[CellUpdate]) -> Result<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            self.writes_rejected.fetch_add(1, Ordering::SeqCst);
            bail!("injected sink failure ({} more to come)", remaining - 1);
        }

        let mut cells = self.cells.lock();
        for update in batch {
            cells.insert(update.address, update.value.clone());
        }
        drop(cells);

        self.batches.lock().push(batch.to_vec());
        self.writes_accepted
            .fetch_add(batch.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
