//! Periodic flush scheduler.
//!
//! The only entity that moves data out of the coalescing buffer. Each tick
//! it sweeps staleness, consults the batch policy, and if a flush is due
//! drains the buffer and hands the batch to the sink behind the backoff
//! gate. Sink errors are caught and logged — the loop never dies; the next
//! tick retries subject to the gate.
//!
//! Drain discipline is peek-then-commit shaped: nothing is drained while
//! the gate is closed, and a batch whose sink call fails is restored into
//! the buffer underneath any fresher values. A quiet symbol's last value
//! therefore survives an outage instead of being discarded with the batch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::PipelineConfig;
use crate::pipeline::backoff::BackoffGate;
use crate::pipeline::buffer::CoalescingBuffer;
use crate::pipeline::dispatcher::TickDispatcher;
use crate::pipeline::metrics::PipelineMetrics;
use crate::sink::CellSink;

pub struct FlushScheduler {
    dispatcher: Arc<TickDispatcher>,
    buffer: Arc<CoalescingBuffer>,
    sink: Arc<dyn CellSink>,
    metrics: Arc<PipelineMetrics>,
    gate: BackoffGate,
    flush_interval: std::time::Duration,
    shutdown_deadline: std::time::Duration,
    shutdown: watch::Receiver<bool>,
}

impl FlushScheduler {
    pub fn new(
        config: &PipelineConfig,
        dispatcher: Arc<TickDispatcher>,
        buffer: Arc<CoalescingBuffer>,
        sink: Arc<dyn CellSink>,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dispatcher,
            buffer,
            sink,
            metrics,
            gate: BackoffGate::new(config.backoff_base, config.backoff_max),
            flush_interval: config.flush_interval,
            shutdown_deadline: config.shutdown_deadline,
            shutdown,
        }
    }

    /// Run until the shutdown signal flips, then perform one final bounded
    /// flush and close the sink.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.flush_interval.as_millis() as u64,
            "flush scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatcher.sweep_staleness(Utc::now());
                    if self.dispatcher.should_flush(Instant::now()) {
                        self.try_flush(false).await;
                    }
                }
                _ = shutdown.changed() => {}
            }
        }

        // Final flush, bounded so shutdown cannot hang on a dead sink.
        if tokio::time::timeout(self.shutdown_deadline, self.flush_now())
            .await
            .is_err()
        {
            warn!(
                deadline_ms = self.shutdown_deadline.as_millis() as u64,
                "final flush exceeded the shutdown deadline"
            );
        }
        if let Err(error) = self.sink.close().await {
            warn!(error = %error, "sink close failed");
        }
        info!("flush scheduler stopped");
    }

    /// Force a flush regardless of the batch policy. Still subject to the
    /// backoff gate.
    pub async fn flush_now(&mut self) {
        self.try_flush(true).await;
    }

    async fn try_flush(&mut self, forced: bool) {
        if self.buffer.is_empty() {
            return;
        }
        if !self.gate.is_open(Instant::now()) {
            PipelineMetrics::incr(&self.metrics.flushes_skipped_backoff);
            trace!(
                failures = self.gate.consecutive_failures(),
                "flush skipped, backoff gate closed"
            );
            return;
        }

        if let Some(oldest) = self.buffer.oldest_enqueued_at() {
            trace!(
                pending_age_ms = oldest.elapsed().as_millis() as u64,
                "draining buffer"
            );
        }
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return;
        }

        PipelineMetrics::incr(&self.metrics.flushes_attempted);
        let started = Instant::now();
        let result = async {
            self.sink.write_batch(&batch).await?;
            self.sink.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.gate.record_success();
                PipelineMetrics::incr(&self.metrics.flushes_succeeded);
                PipelineMetrics::add(&self.metrics.updates_flushed, batch.len() as u64);
                self.metrics.record_flush_latency(elapsed);
                self.dispatcher.reset_policy();
                debug!(
                    updates = batch.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    forced,
                    "flush complete"
                );
            }
            Err(error) => {
                PipelineMetrics::incr(&self.metrics.sink_failures);
                self.gate.record_failure(Instant::now(), &error);
                // Put the batch back under any fresher values; the next open
                // gate window retries with the newest state per cell.
                self.buffer.restore(batch);
            }
        }
    }
}

/// Periodic heartbeat: reflects cumulative counters onto the metrics sheet
/// until shutdown.
pub async fn run_heartbeat(
    dispatcher: Arc<TickDispatcher>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => dispatcher.queue_heartbeat(Utc::now()),
            _ = shutdown.changed() => {}
        }
    }
    debug!("heartbeat task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellAddress, CellValue, Column, Quote};
    use crate::sink::MemorySink;
    use chrono::{DateTime, TimeZone};

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

    struct Rig {
        dispatcher: Arc<TickDispatcher>,
        buffer: Arc<CoalescingBuffer>,
        metrics: Arc<PipelineMetrics>,
        sink: Arc<MemorySink>,
        scheduler: FlushScheduler,
        shutdown_tx: watch::Sender<bool>,
    }

    fn rig() -> Rig {
        let config = PipelineConfig::default();
        let buffer = Arc::new(CoalescingBuffer::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = Arc::new(TickDispatcher::new(
            &config,
            buffer.clone(),
            metrics.clone(),
        ));
        let sink = Arc::new(MemorySink::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = FlushScheduler::new(
            &config,
            dispatcher.clone(),
            buffer.clone(),
            sink.clone(),
            metrics.clone(),
            shutdown_rx,
        );
        Rig {
            dispatcher,
            buffer,
            metrics,
            sink,
            scheduler,
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn forced_flush_drains_to_sink_and_resets_policy() {
        let mut r = rig();
        r.dispatcher.process("X", quote_at(0, 100.0), 1).unwrap();
        assert!(!r.buffer.is_empty());

        r.scheduler.flush_now().await;

        assert!(r.buffer.is_empty());
        assert_eq!(r.sink.batch_count(), 1);
        assert_eq!(
            r.sink.cell(&CellAddress::market_data(Column::Last, 2)),
            Some(CellValue::Decimal(100.0))
        );
        let s = r.metrics.snapshot();
        assert_eq!(s.flushes_succeeded, 1);
        assert!(s.updates_flushed > 0);
        // Policy back to the no-quotes state.
        assert!(!r.dispatcher.should_flush(Instant::now()));
        drop(r.shutdown_tx);
    }

    #[tokio::test]
    async fn failed_flush_restores_batch_and_closes_gate() {
        let mut r = rig();
        r.dispatcher.process("X", quote_at(0, 100.0), 1).unwrap();
        let pending = r.buffer.len();
        r.sink.fail_next_writes(1);

        r.scheduler.flush_now().await;

        // Batch restored; nothing reached the sink.
        assert_eq!(r.buffer.len(), pending);
        assert_eq!(r.sink.batch_count(), 0);
        let s = r.metrics.snapshot();
        assert_eq!(s.sink_failures, 1);
        assert_eq!(s.flushes_succeeded, 0);

        // Gate now closed: the immediate retry is skipped without draining.
        r.scheduler.flush_now().await;
        assert_eq!(r.buffer.len(), pending);
        assert_eq!(r.metrics.snapshot().flushes_skipped_backoff, 1);
        drop(r.shutdown_tx);
    }

    #[tokio::test]
    async fn empty_buffer_flush_is_a_no_op() {
        let mut r = rig();
        r.scheduler.flush_now().await;
        assert_eq!(r.sink.batch_count(), 0);
        assert_eq!(r.metrics.snapshot().flushes_attempted, 0);
        drop(r.shutdown_tx);
    }

    #[tokio::test]
    async fn run_loop_flushes_and_stops_on_shutdown() {
        let config = PipelineConfig {
            batch_max_age: std::time::Duration::from_millis(10),
            flush_interval: std::time::Duration::from_millis(10),
            ..Default::default()
        };
        let buffer = Arc::new(CoalescingBuffer::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = Arc::new(TickDispatcher::new(
            &config,
            buffer.clone(),
            metrics.clone(),
        ));
        let sink = Arc::new(MemorySink::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = FlushScheduler::new(
            &config,
            dispatcher.clone(),
            buffer.clone(),
            sink.clone(),
            metrics.clone(),
            shutdown_rx,
        );

        let handle = tokio::spawn(scheduler.run());
        dispatcher
            .process("X", quote_at(0, 100.0), 1)
            .unwrap();

        // Age rule (10ms) fires within a few scheduler ticks.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(sink.batch_count() >= 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(buffer.is_empty());
    }
}
