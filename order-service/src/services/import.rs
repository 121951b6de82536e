//! CSV order import pipeline.
//!
//! One import runs parse, batch, resolve, materialize, load, aggregate.
//! Every batch costs one resolver query and one bulk load; a uniqueness
//! conflict on the bulk load retries that batch row by row so only the
//! conflicting rows fail. Batches are independent, so an infrastructure
//! failure inside one batch marks its rows failed and the import moves
//! on to the next batch.

use crate::models::{CsvRecord, ImportResult, NewOrder, RatePoint, ResolvedRate, amount_with_tax};
use crate::services::metrics::{observe_import_duration, record_import, record_import_rows};
use crate::services::order_number;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::database::OrderStore;

/// Raw CSV row as serde sees it. Every field is optional at the wire
/// level so a missing or empty column never kills the reader; the real
/// validation happens in `parse_record`.
#[derive(Debug, Deserialize)]
struct RawCsvRow {
    #[serde(default, alias = "Id", alias = "ID")]
    id: Option<String>,
    #[serde(default, alias = "Longitude")]
    longitude: Option<f64>,
    #[serde(default, alias = "Latitude")]
    latitude: Option<f64>,
    #[serde(default, alias = "Timestamp")]
    timestamp: Option<String>,
    #[serde(default, alias = "Subtotal")]
    subtotal: Option<Decimal>,
}

struct ParseFailure {
    record_id: Option<String>,
    message: String,
}

/// Drives one CSV upload through the pipeline against an [`OrderStore`].
pub struct ImportService {
    store: Arc<dyn OrderStore>,
    batch_size: usize,
}

impl ImportService {
    pub fn new(store: Arc<dyn OrderStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Import a CSV byte stream of orders on behalf of one user.
    ///
    /// Row-level problems (malformed rows, unresolved positions,
    /// duplicate order numbers, failed batches) are reported inside the
    /// returned [`ImportResult`]; only an unreadable stream or
    /// cancellation fail the call itself.
    #[instrument(skip(self, input, cancel), fields(user_id = %user_id))]
    pub async fn import_orders<R: Read + Send>(
        &self,
        user_id: Uuid,
        input: R,
        cancel: &CancellationToken,
    ) -> Result<ImportResult, AppError> {
        let started = Instant::now();
        let outcome = self.run_import(user_id, input, cancel).await;
        observe_import_duration(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(result) => {
                record_import("completed");
                record_import_rows("succeeded", result.success_count);
                record_import_rows("failed", result.failed_count);
                info!(
                    total = result.total_records,
                    succeeded = result.success_count,
                    failed = result.failed_count,
                    "Import finished"
                );
            }
            Err(AppError::Cancelled) => {
                record_import("cancelled");
                warn!("Import cancelled");
            }
            Err(e) => {
                record_import("failed");
                warn!(error = %e, "Import failed");
            }
        }

        outcome
    }

    async fn run_import<R: Read + Send>(
        &self,
        user_id: Uuid,
        input: R,
        cancel: &CancellationToken,
    ) -> Result<ImportResult, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let mut result = ImportResult::new();
        let mut batch: Vec<CsvRecord> = Vec::with_capacity(self.batch_size);

        for (index, row) in reader.deserialize::<RawCsvRow>().enumerate() {
            // The header occupies line 1.
            let row_number = index as u32 + 2;

            match row {
                Ok(raw) => match parse_record(raw) {
                    Ok(record) => {
                        batch.push(record.into_csv_record(row_number));
                        if batch.len() >= self.batch_size {
                            self.process_batch(user_id, &mut batch, &mut result, cancel)
                                .await?;
                        }
                    }
                    Err(failure) => {
                        debug!(row = row_number, error = %failure.message, "Skipping invalid row");
                        result.add_failure(row_number, failure.record_id, failure.message);
                    }
                },
                Err(e) if is_stream_error(&e) => {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Failed to read CSV stream: {}",
                        e
                    )));
                }
                Err(e) => {
                    debug!(row = row_number, error = %e, "Skipping malformed row");
                    result.add_failure(row_number, None, format!("Invalid row: {}", e));
                }
            }
        }

        self.process_batch(user_id, &mut batch, &mut result, cancel)
            .await?;

        Ok(result)
    }

    /// Resolve, materialize and load one batch. Row-level outcomes land
    /// in `result`; only cancellation propagates as an error.
    async fn process_batch(
        &self,
        user_id: Uuid,
        batch: &mut Vec<CsvRecord>,
        result: &mut ImportResult,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        if batch.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let records = std::mem::take(batch);
        debug!(batch_size = records.len(), "Processing batch");

        let points: Vec<RatePoint> = records
            .iter()
            .map(|r| RatePoint {
                latitude: r.latitude,
                longitude: r.longitude,
                timestamp: r.timestamp,
            })
            .collect();

        let resolved = match self.store.resolve_rates(&points).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, batch_size = records.len(), "Rate resolution failed for batch");
                let message = e.to_string();
                for record in &records {
                    result.add_failure(
                        record.row_number,
                        record.external_id.clone(),
                        message.clone(),
                    );
                }
                return Ok(());
            }
        };

        let mut orders: Vec<NewOrder> = Vec::with_capacity(records.len());
        let mut sources: Vec<(u32, Option<String>)> = Vec::with_capacity(records.len());

        for (position, record) in records.into_iter().enumerate() {
            match resolved.get(position).copied().flatten() {
                Some(rate) => match materialize(user_id, &record, &rate) {
                    Some(order) => {
                        sources.push((record.row_number, record.external_id.clone()));
                        orders.push(order);
                    }
                    None => {
                        result.add_failure(
                            record.row_number,
                            record.external_id.clone(),
                            format!(
                                "Taxed amount for subtotal {} at rate {} exceeds the representable range",
                                record.subtotal, rate.total_rate
                            ),
                        );
                    }
                },
                None => {
                    result.add_failure(
                        record.row_number,
                        record.external_id.clone(),
                        format!(
                            "No tax jurisdiction found for coordinates ({}, {}) at {}",
                            record.latitude, record.longitude, record.timestamp
                        ),
                    );
                }
            }
        }

        if orders.is_empty() {
            return Ok(());
        }

        match self.store.bulk_insert_orders(&orders).await {
            Ok(()) => {
                result.add_successes(orders.len());
            }
            Err(AppError::Conflict(_)) => {
                warn!(
                    batch_size = orders.len(),
                    "Bulk load conflicted, retrying batch row by row"
                );
                self.load_rows_individually(&orders, &sources, result, cancel)
                    .await?;
            }
            Err(e) => {
                warn!(error = %e, batch_size = orders.len(), "Bulk load failed for batch");
                let message = e.to_string();
                for (row_number, record_id) in sources {
                    result.add_failure(row_number, record_id, message.clone());
                }
            }
        }

        Ok(())
    }

    /// Fallback for a conflicted bulk load: insert each row of the batch
    /// on its own so exactly the conflicting rows fail.
    async fn load_rows_individually(
        &self,
        orders: &[NewOrder],
        sources: &[(u32, Option<String>)],
        result: &mut ImportResult,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        for (order, (row_number, record_id)) in orders.iter().zip(sources) {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            match self.store.insert_order_if_absent(order).await {
                Ok(true) => result.add_successes(1),
                Ok(false) => result.add_failure(
                    *row_number,
                    record_id.clone(),
                    format!("Order {} already exists", order.order_number),
                ),
                Err(e) => result.add_failure(*row_number, record_id.clone(), e.to_string()),
            }
        }
        Ok(())
    }
}

/// A validated row minus its position in the file.
struct ParsedRow {
    external_id: Option<String>,
    longitude: f64,
    latitude: f64,
    timestamp: DateTime<Utc>,
    subtotal: Decimal,
}

impl ParsedRow {
    fn into_csv_record(self, row_number: u32) -> CsvRecord {
        CsvRecord {
            row_number,
            external_id: self.external_id,
            longitude: self.longitude,
            latitude: self.latitude,
            timestamp: self.timestamp,
            subtotal: self.subtotal,
        }
    }
}

fn parse_record(raw: RawCsvRow) -> Result<ParsedRow, ParseFailure> {
    let external_id = raw.id.filter(|s| !s.is_empty());

    let longitude = require(raw.longitude, "longitude", &external_id)?;
    let latitude = require(raw.latitude, "latitude", &external_id)?;
    let subtotal = require(raw.subtotal, "subtotal", &external_id)?;
    let timestamp_text = require(
        raw.timestamp.filter(|s| !s.is_empty()),
        "timestamp",
        &external_id,
    )?;

    let timestamp = parse_timestamp(&timestamp_text).ok_or_else(|| ParseFailure {
        record_id: external_id.clone(),
        message: format!("Unrecognized timestamp '{}'", timestamp_text),
    })?;

    Ok(ParsedRow {
        external_id,
        longitude,
        latitude,
        timestamp,
        subtotal,
    })
}

fn require<T>(
    field: Option<T>,
    name: &str,
    record_id: &Option<String>,
) -> Result<T, ParseFailure> {
    field.ok_or_else(|| ParseFailure {
        record_id: record_id.clone(),
        message: format!("Missing required field '{}'", name),
    })
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Normalize any accepted timestamp text to a UTC instant. Zoned input
/// is converted; unzoned input is taken to already be UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
        return Some(zoned.with_timezone(&Utc));
    }
    if let Ok(zoned) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(zoned.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
    }
    None
}

fn is_stream_error(e: &csv::Error) -> bool {
    matches!(e.kind(), csv::ErrorKind::Io(_))
}

/// Combine a parsed record with its resolved rate into a loadable order.
/// Returns `None` when the taxed amount overflows the decimal range.
fn materialize(user_id: Uuid, record: &CsvRecord, rate: &ResolvedRate) -> Option<NewOrder> {
    let amount_with_tax = amount_with_tax(record.subtotal, rate.total_rate)?;
    let now = Utc::now();
    let order_number = match &record.external_id {
        Some(external_id) => order_number::deterministic(&user_id, external_id),
        None => order_number::anonymous(&user_id, record.timestamp),
    };

    Some(NewOrder {
        id: Uuid::new_v4(),
        order_number,
        user_id,
        amount: record.subtotal,
        amount_with_tax,
        latitude: record.latitude,
        longitude: record.longitude,
        tax_rates_id: rate.tax_rate_id,
        timestamp: record.timestamp,
        created_at: now,
        updated_at: now,
    })
}
