//! ticksheet binary: wire a producer, the pipeline, and a sink together.
//!
//! Exit codes: 0 normal shutdown, 1 unexpected fatal (including sink open
//! failure), 2 configuration error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ticksheet::config::PipelineConfig;
use ticksheet::pipeline::Pipeline;
use ticksheet::producer::{DemoProducer, QuoteProducer, ReplayProducer};
use ticksheet::sink::{CellSink, MemorySink, StdoutSink};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProducerKind {
    Demo,
    Replay,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkKind {
    Stdout,
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "ticksheet", about = "Reflect live quotes into spreadsheet cells")]
struct Args {
    /// Quote source.
    #[arg(long, value_enum, default_value = "demo")]
    producer: ProducerKind,

    /// JSONL capture to replay (required with --producer replay).
    #[arg(long, env = "TICKSHEET_REPLAY_FILE")]
    replay_file: Option<PathBuf>,

    /// Pause between replayed ticks, in milliseconds.
    #[arg(long)]
    replay_pace_ms: Option<u64>,

    /// Where cell batches go.
    #[arg(long, value_enum, default_value = "stdout")]
    sink: SinkKind,

    /// Symbols for the demo producer.
    #[arg(long, env = "TICKSHEET_SYMBOLS", value_delimiter = ',',
          default_value = "GGAL,YPFD,PAMP,GGAL 24hs")]
    symbols: Vec<String>,

    /// Demo tick period per symbol, in milliseconds.
    #[arg(long, default_value_t = 50)]
    demo_interval_ms: u64,

    /// Demo walk seed.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn build_producer(args: &Args) -> Result<Arc<dyn QuoteProducer>> {
    Ok(match args.producer {
        ProducerKind::Demo => Arc::new(DemoProducer::new(
            args.symbols.clone(),
            Duration::from_millis(args.demo_interval_ms),
            args.seed,
        )),
        ProducerKind::Replay => {
            let path = args
                .replay_file
                .clone()
                .context("--replay-file is required with --producer replay")?;
            Arc::new(ReplayProducer::new(
                path,
                args.replay_pace_ms.map(Duration::from_millis),
            ))
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = PipelineConfig::from_env();
    if let Err(error) = config.validate() {
        error!(error = %error, "invalid configuration");
        std::process::exit(2);
    }
    info!(
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "configuration loaded"
    );

    let sink: Arc<dyn CellSink> = match args.sink {
        SinkKind::Stdout => Arc::new(StdoutSink::new()),
        SinkKind::Memory => Arc::new(MemorySink::new()),
    };
    // The pipeline cannot operate without a sink.
    sink.open().await.context("failed to open sink")?;

    let producer = build_producer(&args)?;
    let pipeline = Arc::new(Pipeline::new(config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = pipeline.scheduler(sink, shutdown_rx.clone());
    let scheduler_handle = tokio::spawn(scheduler.run());
    let heartbeat_handle = pipeline.spawn_heartbeat(shutdown_rx.clone());

    let producer_pipeline = pipeline.clone();
    let producer_shutdown = shutdown_rx.clone();
    let mut producer_handle = tokio::spawn(async move {
        if let Err(error) = producer.run(producer_pipeline, producer_shutdown).await {
            error!(error = %error, "producer stopped with error");
        }
    });

    // Producer stops first, then the scheduler performs its final flush.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            let _ = producer_handle.await;
        }
        _ = &mut producer_handle => {
            info!("producer finished, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    let _ = heartbeat_handle.await;
    scheduler_handle.await.context("scheduler task panicked")?;

    let snapshot = pipeline.metrics().snapshot();
    info!(
        ticks = snapshot.ticks_received,
        flushed = snapshot.updates_flushed,
        gaps = snapshot.gaps_detected,
        "shutdown complete"
    );
    Ok(())
}
