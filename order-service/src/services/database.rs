//! Database service for order-service.

use crate::models::{NewOrder, Order, OrderChanges, RatePoint, ResolvedRate, TaxRate};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Storage operations the import pipeline depends on. The production
/// implementation is [`Database`]; tests drive the pipeline against an
/// in-memory store.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Resolve the tax rate valid at each position, in one round trip.
    /// The output is index-aligned with `points`; positions matching no
    /// jurisdiction, or no rate valid at their timestamp, come back as
    /// `None`.
    async fn resolve_rates(
        &self,
        points: &[RatePoint],
    ) -> Result<Vec<Option<ResolvedRate>>, AppError>;

    /// Write one batch of orders as a single unit. A uniqueness conflict
    /// on the order number rejects the whole batch with
    /// `AppError::Conflict` and persists nothing.
    async fn bulk_insert_orders(&self, orders: &[NewOrder]) -> Result<(), AppError>;

    /// Insert one order unless its order number is already taken.
    /// Returns whether a row was written.
    async fn insert_order_if_absent(&self, order: &NewOrder) -> Result<bool, AppError>;

    /// Single-position variant of [`OrderStore::resolve_rates`], returning
    /// the full rate row.
    async fn resolve_rate_for_point(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<TaxRate>, AppError>;
}

const RESOLVE_RATES_SQL: &str = r#"
SELECT input.idx, j.id AS jurisdiction_id, tr.id AS tax_rate_id, tr.total_rate
FROM unnest($1::float8[], $2::float8[], $3::timestamptz[])
    WITH ORDINALITY AS input(lat, lon, ts, idx)
JOIN jurisdictions j
    ON ST_Contains(j.geom, ST_SetSRID(ST_MakePoint(input.lon, input.lat), 4269))
JOIN tax_rates tr
    ON tr.jurisdiction_id = j.id
    AND input.ts >= tr.valid_from
    AND (tr.valid_to IS NULL OR input.ts < tr.valid_to)
"#;

const COPY_ORDERS_SQL: &str = r#"COPY orders (id, order_number, user_id, amount, amount_with_tax, latitude, longitude, tax_rates_id, "timestamp", created_at, updated_at) FROM STDIN"#;

/// One row of the bulk resolver result. `idx` is the 1-based ordinality
/// of the input position.
#[derive(Debug, sqlx::FromRow)]
struct RateMatchRow {
    idx: i64,
    jurisdiction_id: Uuid,
    tax_rate_id: Uuid,
    total_rate: Decimal,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "order-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Order Operations
    // =========================================================================

    /// Insert a single order.
    #[instrument(skip(self, order), fields(order_number = %order.order_number, user_id = %order.user_id))]
    pub async fn insert_order(&self, order: &NewOrder) -> Result<Order, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order"])
            .start_timer();

        let inserted = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (id, order_number, user_id, amount, amount_with_tax, latitude, longitude, tax_rates_id, "timestamp", created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, order_number, user_id, amount, amount_with_tax, latitude, longitude, tax_rates_id, "timestamp", created_at, updated_at
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(order.amount)
        .bind(order.amount_with_tax)
        .bind(order.latitude)
        .bind(order.longitude)
        .bind(order.tax_rates_id)
        .bind(order.timestamp)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Order {} already exists",
                    order.order_number
                ))
            }
            e => AppError::DatabaseError(anyhow::anyhow!("Failed to insert order: {}", e)),
        })?;

        timer.observe_duration();
        Ok(inserted)
    }

    /// Get an order owned by a user.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, order_number, user_id, amount, amount_with_tax, latitude, longitude, tax_rates_id, "timestamp", created_at, updated_at
            FROM orders
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order: {}", e)))?;

        timer.observe_duration();
        order.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))
    }

    /// Apply an edit that was re-resolved against the rate dataset. The
    /// order number is never changed by an edit.
    #[instrument(skip(self, changes), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn update_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        changes: &OrderChanges,
    ) -> Result<Order, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_order"])
            .start_timer();

        let updated = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET amount = $3,
                amount_with_tax = $4,
                latitude = $5,
                longitude = $6,
                tax_rates_id = $7,
                "timestamp" = $8,
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING id, order_number, user_id, amount, amount_with_tax, latitude, longitude, tax_rates_id, "timestamp", created_at, updated_at
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(changes.amount)
        .bind(changes.amount_with_tax)
        .bind(changes.latitude)
        .bind(changes.longitude)
        .bind(changes.tax_rates_id)
        .bind(changes.timestamp)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update order: {}", e)))?;

        timer.observe_duration();
        updated.ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))
    }

    /// Delete an order owned by a user.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn delete_order(&self, user_id: Uuid, order_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_order"])
            .start_timer();

        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND user_id = $2")
            .bind(order_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete order: {}", e)))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Order {} not found",
                order_id
            )));
        }

        info!(order_id = %order_id, "Order deleted");
        Ok(())
    }
}

#[async_trait]
impl OrderStore for Database {
    #[instrument(skip(self, points), fields(point_count = points.len()))]
    async fn resolve_rates(
        &self,
        points: &[RatePoint],
    ) -> Result<Vec<Option<ResolvedRate>>, AppError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["resolve_rates"])
            .start_timer();

        let lats: Vec<f64> = points.iter().map(|p| p.latitude).collect();
        let lons: Vec<f64> = points.iter().map(|p| p.longitude).collect();
        let timestamps: Vec<DateTime<Utc>> = points.iter().map(|p| p.timestamp).collect();

        let matches = sqlx::query_as::<_, RateMatchRow>(RESOLVE_RATES_SQL)
            .bind(&lats)
            .bind(&lons)
            .bind(&timestamps)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to resolve tax rates: {}", e))
            })?;

        timer.observe_duration();

        // Ordinality is 1-based. Overlapping rate intervals would produce
        // several rows for one index; the last one wins.
        let mut resolved: Vec<Option<ResolvedRate>> = vec![None; points.len()];
        for row in matches {
            if let Some(slot) = resolved.get_mut((row.idx - 1) as usize) {
                *slot = Some(ResolvedRate {
                    jurisdiction_id: row.jurisdiction_id,
                    tax_rate_id: row.tax_rate_id,
                    total_rate: row.total_rate,
                });
            }
        }

        Ok(resolved)
    }

    #[instrument(skip(self, orders), fields(order_count = orders.len()))]
    async fn bulk_insert_orders(&self, orders: &[NewOrder]) -> Result<(), AppError> {
        if orders.is_empty() {
            return Ok(());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["bulk_insert_orders"])
            .start_timer();

        let mut payload = String::new();
        for order in orders {
            payload.push_str(&copy_row(order));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut copy = tx
            .copy_in_raw(COPY_ORDERS_SQL)
            .await
            .map_err(map_copy_error)?;
        copy.send(payload.as_bytes()).await.map_err(map_copy_error)?;
        copy.finish().await.map_err(map_copy_error)?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit bulk load: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn insert_order_if_absent(&self, order: &NewOrder) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order_if_absent"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, amount, amount_with_tax, latitude, longitude, tax_rates_id, "timestamp", created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(order.amount)
        .bind(order.amount_with_tax)
        .bind(order.latitude)
        .bind(order.longitude)
        .bind(order.tax_rates_id)
        .bind(order.timestamp)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert order: {}", e)))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn resolve_rate_for_point(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<TaxRate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["resolve_rate_for_point"])
            .start_timer();

        let rate = sqlx::query_as::<_, TaxRate>(
            r#"
            SELECT tr.id, tr.state, tr.zipcode, tr.tax_region_name, tr.total_rate,
                   tr.state_rate, tr.estimated_county_rate, tr.estimated_city_rate,
                   tr.estimated_special_rate, tr.jurisdiction_id, tr.valid_from, tr.valid_to
            FROM tax_rates tr
            JOIN jurisdictions j ON j.id = tr.jurisdiction_id
            WHERE ST_Contains(j.geom, ST_SetSRID(ST_MakePoint($2, $1), 4269))
              AND $3 >= tr.valid_from
              AND (tr.valid_to IS NULL OR $3 < tr.valid_to)
            LIMIT 1
            "#,
        )
        .bind(latitude)
        .bind(longitude)
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to resolve tax rate: {}", e))
        })?;

        timer.observe_duration();
        Ok(rate)
    }
}

fn map_copy_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => AppError::Conflict(
            anyhow::anyhow!("Bulk order load hit a duplicate order number: {}", e),
        ),
        e => AppError::DatabaseError(anyhow::anyhow!("Bulk order load failed: {}", e)),
    }
}

/// One COPY text-format line, tab separated. Order numbers may carry
/// arbitrary external ids, so text fields are escaped.
fn copy_row(order: &NewOrder) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
        order.id,
        escape_copy_text(&order.order_number),
        order.user_id,
        order.amount,
        order.amount_with_tax,
        order.latitude,
        order.longitude,
        order.tax_rates_id,
        order.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        order.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        order.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    )
}

fn escape_copy_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn sample_order() -> NewOrder {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        NewOrder {
            id: Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap(),
            order_number: "ORD-A1B2-INV-42".to_string(),
            user_id: Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap(),
            amount: Decimal::from_str("100.00").unwrap(),
            amount_with_tax: Decimal::from_str("108.00").unwrap(),
            latitude: 40.7128,
            longitude: -74.0060,
            tax_rates_id: Uuid::parse_str("99999999-8888-7777-6666-555555555555").unwrap(),
            timestamp: ts,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_copy_row_is_tab_separated_with_trailing_newline() {
        let row = copy_row(&sample_order());
        assert!(row.ends_with('\n'));
        assert_eq!(row.trim_end().split('\t').count(), 11);
    }

    #[test]
    fn test_copy_row_formats_timestamps_as_utc_instants() {
        let row = copy_row(&sample_order());
        assert!(row.contains("2024-03-15T10:30:00.000000Z"));
    }

    #[test]
    fn test_escape_copy_text_neutralizes_delimiters() {
        assert_eq!(escape_copy_text("plain"), "plain");
        assert_eq!(escape_copy_text("a\tb"), "a\\tb");
        assert_eq!(escape_copy_text("a\nb"), "a\\nb");
        assert_eq!(escape_copy_text("a\\b"), "a\\\\b");
    }
}
