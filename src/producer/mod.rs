//! Producer capability: where ticks come from.
//!
//! A producer pushes `(symbol, quote, sequence)` into the pipeline until its
//! source is exhausted or the shutdown signal flips. The pipeline serializes
//! internally, so producers may call from one or many tasks.

pub mod demo;
pub mod replay;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::pipeline::Pipeline;

pub use demo::DemoProducer;
pub use replay::ReplayProducer;

#[async_trait]
pub trait QuoteProducer: Send + Sync {
    /// Deliver ticks until done or shut down.
    async fn run(&self, pipeline: Arc<Pipeline>, shutdown: watch::Receiver<bool>) -> Result<()>;
}
