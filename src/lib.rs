//! ticksheet — real-time quote → spreadsheet reflection pipeline.
//!
//! Ingests a stream of market-data quotes and continuously reflects each
//! instrument's latest state into cells of an external spreadsheet, without
//! ever letting the slow, occasionally-unavailable sink block the intake.

pub mod config;
pub mod model;
pub mod pipeline;
pub mod producer;
pub mod sink;

// Re-export the types most callers wire together.
pub use config::PipelineConfig;
pub use model::{CellAddress, CellUpdate, CellValue, Column, Quote};
pub use pipeline::{Pipeline, TickOutcome};
pub use producer::QuoteProducer;
pub use sink::CellSink;
