//! Core data model: quotes, cell addresses, cell updates.
//!
//! A `Quote` is an immutable snapshot of one instrument's market-data fields
//! at an event time. A `CellUpdate` is a pending write of one typed value to
//! one (sheet, column, row) address. Columns are addressed by human-readable
//! name, never by spreadsheet letter; the sink resolves name -> physical
//! column and creates unknown columns on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sheet carrying one row per instrument.
pub const SHEET_MARKET_DATA: &str = "MarketData";

/// Sheet carrying the heartbeat row.
pub const SHEET_METRICS: &str = "Metrics";

/// Row 1 is reserved for headers on every sheet.
pub const FIRST_DATA_ROW: u32 = 2;

/// Fixed row the heartbeat writes on the metrics sheet.
pub const METRICS_ROW: u32 = 2;

// =============================================================================
// Quote
// =============================================================================

/// Immutable snapshot of one instrument's fields at an event time.
///
/// All price fields are optional; feeds routinely omit sides. Non-`change`
/// numeric fields are non-negative by contract — `sanitize` coerces any
/// negative value to absent before the quote is stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask: Option<f64>,
    pub ask_size: Option<f64>,
    pub last: Option<f64>,
    /// Signed change vs previous close; the one field allowed to be negative.
    pub change: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub turnover: Option<f64>,
    pub volume: Option<u64>,
    pub operations: Option<u64>,
    /// Wall-clock instant assigned by the producer.
    pub event_time: DateTime<Utc>,
}

impl Quote {
    /// Coerce negative non-`change` fields to absent.
    pub fn sanitize(mut self) -> Self {
        fn drop_negative(field: &mut Option<f64>) {
            if matches!(field, Some(v) if *v < 0.0) {
                *field = None;
            }
        }
        drop_negative(&mut self.bid);
        drop_negative(&mut self.bid_size);
        drop_negative(&mut self.ask);
        drop_negative(&mut self.ask_size);
        drop_negative(&mut self.last);
        drop_negative(&mut self.open);
        drop_negative(&mut self.high);
        drop_negative(&mut self.low);
        drop_negative(&mut self.previous_close);
        drop_negative(&mut self.turnover);
        self
    }
}

// =============================================================================
// Instrument variant
// =============================================================================

/// Settlement variant derived from the symbol naming convention.
///
/// Immutable once assigned. `GGAL` is spot, `GGAL 24hs` settles T+1,
/// anything else with a qualifier is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstrumentVariant {
    Spot,
    Settlement24h,
    Other,
}

impl InstrumentVariant {
    pub fn from_symbol(symbol: &str) -> Self {
        let s = symbol.trim().to_ascii_lowercase();
        if s.ends_with("24hs") {
            Self::Settlement24h
        } else if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            Self::Spot
        } else {
            Self::Other
        }
    }
}

// =============================================================================
// Cell addressing
// =============================================================================

/// The fixed, case-sensitive column vocabulary.
///
/// Sinks must treat any name outside their current header row as a request
/// to create it; the core never deals in letter coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Column {
    // Management columns
    Symbol,
    LastUpdate,
    IsStale,
    GapCount,
    Sequence,
    // Market-data columns
    Last,
    Bid,
    Ask,
    BidSize,
    AskSize,
    Volume,
    Change,
    Open,
    High,
    Low,
    Timestamp,
    // Heartbeat columns
    TotalQuotes,
    TotalGaps,
    StaleCount,
    InstrumentCount,
    RetentionTotalEvicted,
    RetentionLastEvictionUtc,
    RetentionLastBatchEvicted,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symbol => "Symbol",
            Self::LastUpdate => "LastUpdate",
            Self::IsStale => "IsStale",
            Self::GapCount => "GapCount",
            Self::Sequence => "Sequence",
            Self::Last => "Last",
            Self::Bid => "Bid",
            Self::Ask => "Ask",
            Self::BidSize => "BidSize",
            Self::AskSize => "AskSize",
            Self::Volume => "Volume",
            Self::Change => "Change",
            Self::Open => "Open",
            Self::High => "High",
            Self::Low => "Low",
            Self::Timestamp => "Timestamp",
            Self::TotalQuotes => "TotalQuotes",
            Self::TotalGaps => "TotalGaps",
            Self::StaleCount => "StaleCount",
            Self::InstrumentCount => "InstrumentCount",
            Self::RetentionTotalEvicted => "RetentionTotalEvicted",
            Self::RetentionLastEvictionUtc => "RetentionLastEvictionUtc",
            Self::RetentionLastBatchEvicted => "RetentionLastBatchEvicted",
        }
    }
}

/// (sheet, column, row) triple identifying one spreadsheet cell.
///
/// Rows start at [`FIRST_DATA_ROW`]; row 1 is headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellAddress {
    pub sheet: &'static str,
    pub column: Column,
    pub row: u32,
}

impl CellAddress {
    pub fn market_data(column: Column, row: u32) -> Self {
        Self {
            sheet: SHEET_MARKET_DATA,
            column,
            row,
        }
    }

    pub fn metrics(column: Column) -> Self {
        Self {
            sheet: SHEET_METRICS,
            column,
            row: METRICS_ROW,
        }
    }
}

/// One typed cell payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Instant(DateTime<Utc>),
    Absent,
}

/// A pending write of one value to one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellUpdate {
    pub address: CellAddress,
    pub value: CellValue,
}

impl CellUpdate {
    pub fn new(address: CellAddress, value: CellValue) -> Self {
        Self { address, value }
    }
}
