//! Order model for order-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A persisted order. `amount_with_tax` is computed once from the rate
/// that was valid at `timestamp` and is never recomputed from current
/// rates afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub amount_with_tax: Decimal,
    pub latitude: f64,
    pub longitude: f64,
    pub tax_rates_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fully materialized order ready to be written.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub amount_with_tax: Decimal,
    pub latitude: f64,
    pub longitude: f64,
    pub tax_rates_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a single order. The timestamp defaults to now
/// when omitted.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub amount: Decimal,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(
        min = -180.0,
        max = 180.0,
        message = "Longitude must be between -180 and 180"
    ))]
    pub longitude: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Re-resolved values written back by an order edit.
#[derive(Debug, Clone)]
pub struct OrderChanges {
    pub amount: Decimal,
    pub amount_with_tax: Decimal,
    pub latitude: f64,
    pub longitude: f64,
    pub tax_rates_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Input for editing an order. The rate is re-resolved for the new
/// position and time; the order number is left untouched.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateOrderRequest {
    pub amount: Decimal,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(
        min = -180.0,
        max = 180.0,
        message = "Longitude must be between -180 and 180"
    ))]
    pub longitude: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Tax-inclusive total: `amount * (1 + total_rate)`. Returns `None` when
/// the product exceeds the representable decimal range.
pub fn amount_with_tax(amount: Decimal, total_rate: Decimal) -> Option<Decimal> {
    Decimal::ONE
        .checked_add(total_rate)
        .and_then(|multiplier| amount.checked_mul(multiplier))
}
