//! Stdout recorder sink.
//!
//! One JSON line per batch. Useful for piping a live run into `jq` or a
//! file when no spreadsheet is attached.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::model::CellUpdate;
use crate::sink::CellSink;

#[derive(Debug, Default)]
pub struct StdoutSink {
    batches_written: AtomicU64,
}

#[derive(Serialize)]
struct BatchLine<'a> {
    at: chrono::DateTime<Utc>,
    batch: u64,
    updates: &'a [CellUpdate],
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CellSink for StdoutSink {
    async fn open(&self) -> Result<()> {
        info!("stdout sink open, one JSON line per batch");
        Ok(())
    }

    async fn write_batch(&self, batch: &[CellUpdate]) -> Result<()> {
        let n = self.batches_written.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&BatchLine {
            at: Utc::now(),
            batch: n,
            updates: batch,
        })
        .context("failed to encode batch")?;
        println!("{line}");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        use std::io::Write;
        std::io::stdout().flush().context("failed to flush stdout")
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}
