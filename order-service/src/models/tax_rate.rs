//! Tax rate model for order-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A tax rate attached to a jurisdiction for a half-open validity
/// interval `[valid_from, valid_to)`. A NULL `valid_to` means the rate
/// is currently in effect.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaxRate {
    pub id: Uuid,
    pub state: String,
    pub zipcode: String,
    pub tax_region_name: String,
    pub total_rate: Decimal,
    pub state_rate: Decimal,
    pub estimated_county_rate: Decimal,
    pub estimated_city_rate: Decimal,
    pub estimated_special_rate: Decimal,
    pub jurisdiction_id: Uuid,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// One position to resolve: where an order happened and when.
#[derive(Debug, Clone, Copy)]
pub struct RatePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// The rate the resolver matched for one input position.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRate {
    pub jurisdiction_id: Uuid,
    pub tax_rate_id: Uuid,
    pub total_rate: Decimal,
}
