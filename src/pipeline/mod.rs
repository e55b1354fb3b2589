//! The in-process tick pipeline.
//!
//! Producer -> dispatcher -> per-symbol state, retention, freshness ->
//! coalescing buffer; scheduler -> batch policy -> drain -> backoff gate ->
//! sink. The buffer is the single interchange between the producer side and
//! the sink side: a tick never waits on the sink, and a flaky sink never
//! backpressures the intake.

pub mod backoff;
pub mod buffer;
pub mod dispatcher;
pub mod freshness;
pub mod instrument;
pub mod metrics;
pub mod policy;
pub mod retention;
pub mod scheduler;
pub mod sequence;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::config::PipelineConfig;
use crate::model::Quote;
use crate::sink::CellSink;

pub use buffer::CoalescingBuffer;
pub use dispatcher::TickDispatcher;
pub use instrument::{InstrumentState, RejectReason, TickOutcome};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use scheduler::{run_heartbeat, FlushScheduler};
pub use sequence::{SequenceClass, NO_SEQUENCE};

/// Wires the pipeline pieces together and hands out the task entry points.
pub struct Pipeline {
    config: PipelineConfig,
    buffer: Arc<CoalescingBuffer>,
    metrics: Arc<PipelineMetrics>,
    dispatcher: Arc<TickDispatcher>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let buffer = Arc::new(CoalescingBuffer::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = Arc::new(TickDispatcher::new(
            &config,
            buffer.clone(),
            metrics.clone(),
        ));
        Self {
            config,
            buffer,
            metrics,
            dispatcher,
        }
    }

    /// Producer-facing entry point; see [`TickDispatcher::process`].
    pub fn process(&self, symbol: &str, quote: Quote, sequence: i64) -> Result<TickOutcome> {
        self.dispatcher.process(symbol, quote, sequence)
    }

    /// Build the flush scheduler for `sink`, observing `shutdown`.
    pub fn scheduler(
        &self,
        sink: Arc<dyn CellSink>,
        shutdown: watch::Receiver<bool>,
    ) -> FlushScheduler {
        FlushScheduler::new(
            &self.config,
            self.dispatcher.clone(),
            self.buffer.clone(),
            sink,
            self.metrics.clone(),
            shutdown,
        )
    }

    /// Spawn the heartbeat loop on the current runtime.
    pub fn spawn_heartbeat(&self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(run_heartbeat(
            self.dispatcher.clone(),
            self.config.heartbeat_interval,
            shutdown,
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<TickDispatcher> {
        &self.dispatcher
    }

    pub fn buffer(&self) -> &Arc<CoalescingBuffer> {
        &self.buffer
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }
}
