//! Parsed CSV row, not yet resolved against any jurisdiction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// One validated row of an order CSV upload. `row_number` starts at 2,
/// counting the header as line 1, and survives batching so failures can
/// be attributed to the original line.
#[derive(Debug, Clone)]
pub struct CsvRecord {
    pub row_number: u32,
    pub external_id: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub timestamp: DateTime<Utc>,
    pub subtotal: Decimal,
}
