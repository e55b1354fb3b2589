//! Replay producer: ticks from a JSONL capture file.
//!
//! One record per line: `{"symbol": "...", "sequence": 5, "quote": {...}}`.
//! A missing `sequence` replays as unsequenced. Malformed lines are skipped
//! with a warning rather than aborting the replay.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::model::Quote;
use crate::pipeline::sequence::NO_SEQUENCE;
use crate::pipeline::Pipeline;
use crate::producer::QuoteProducer;

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    symbol: String,
    #[serde(default = "default_sequence")]
    sequence: i64,
    quote: Quote,
}

fn default_sequence() -> i64 {
    NO_SEQUENCE
}

pub struct ReplayProducer {
    path: PathBuf,
    /// Pause between ticks; `None` replays as fast as the dispatcher takes them.
    pace: Option<Duration>,
}

impl ReplayProducer {
    pub fn new(path: PathBuf, pace: Option<Duration>) -> Self {
        Self { path, pace }
    }
}

#[async_trait]
impl QuoteProducer for ReplayProducer {
    async fn run(&self, pipeline: Arc<Pipeline>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read replay file {}", self.path.display()))?;

        info!(path = %self.path.display(), "replay started");
        let mut delivered = 0u64;
        let mut skipped = 0u64;

        for (line_no, line) in content.lines().enumerate() {
            if *shutdown.borrow() {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record: ReplayRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(error) => {
                    skipped += 1;
                    warn!(line = line_no + 1, error = %error, "skipping malformed replay line");
                    continue;
                }
            };

            if let Err(error) =
                pipeline.process(&record.symbol, record.quote, record.sequence)
            {
                warn!(line = line_no + 1, error = %error, "tick rejected by dispatcher");
                continue;
            }
            delivered += 1;

            if let Some(pace) = self.pace {
                tokio::time::sleep(pace).await;
            }
        }

        info!(delivered, skipped, "replay finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::io::Write;

    #[tokio::test]
    async fn replays_well_formed_lines_and_skips_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"symbol":"GGAL","sequence":1,"quote":{{"last":100.0,"event_time":"2024-01-15T10:30:00Z"}}}}"#
        )
        .unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(
            file,
            r#"{{"symbol":"GGAL","sequence":2,"quote":{{"last":101.0,"event_time":"2024-01-15T10:30:01Z"}}}}"#
        )
        .unwrap();

        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()));
        let producer = ReplayProducer::new(file.path().to_path_buf(), None);
        let (_tx, rx) = watch::channel(false);

        producer.run(pipeline.clone(), rx).await.unwrap();

        let inst = pipeline.dispatcher().instrument("GGAL").unwrap();
        assert_eq!(inst.last_sequence(), Some(2));
        assert_eq!(inst.last_quote().unwrap().last, Some(101.0));
        assert_eq!(pipeline.metrics().snapshot().ticks_accepted, 2);
    }

    #[tokio::test]
    async fn missing_sequence_replays_as_unsequenced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"symbol":"GGAL","quote":{{"last":100.0,"event_time":"2024-01-15T10:30:00Z"}}}}"#
        )
        .unwrap();

        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()));
        let producer = ReplayProducer::new(file.path().to_path_buf(), None);
        let (_tx, rx) = watch::channel(false);
        producer.run(pipeline.clone(), rx).await.unwrap();

        let inst = pipeline.dispatcher().instrument("GGAL").unwrap();
        assert_eq!(inst.last_sequence(), None);
        assert_eq!(inst.gap_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()));
        let producer = ReplayProducer::new(PathBuf::from("/nonexistent/capture.jsonl"), None);
        let (_tx, rx) = watch::channel(false);
        assert!(producer.run(pipeline, rx).await.is_err());
    }
}
