//! Sink capability: where batches of cell updates go.
//!
//! The core depends on this trait only; concrete spreadsheets live behind
//! it. A sink resolves column names to physical columns itself and must
//! treat an unknown name as a request to create that column. Any method may
//! fail; the scheduler's backoff gate owns retry policy.

pub mod memory;
pub mod stdout;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::CellUpdate;

pub use memory::MemorySink;
pub use stdout::StdoutSink;

#[async_trait]
pub trait CellSink: Send + Sync {
    /// Open or create the backing document. A failure here is fatal — the
    /// pipeline cannot operate without a sink.
    async fn open(&self) -> Result<()>;

    /// Accept a batch of cell writes; returns once durably accepted.
    async fn write_batch(&self, batch: &[CellUpdate]) -> Result<()>;

    /// Persist previously accepted writes.
    async fn flush(&self) -> Result<()>;

    /// Release the backing document.
    async fn close(&self) -> Result<()>;
}
