//! Single-order operations.

use crate::models::{
    CreateOrderRequest, NewOrder, Order, OrderChanges, TaxRate, UpdateOrderRequest,
    amount_with_tax,
};
use crate::services::metrics::record_order_operation;
use crate::services::order_number;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::database::{Database, OrderStore};

/// CRUD over individual orders. Rates come from the same jurisdiction
/// lookup the bulk import uses, one point at a time.
pub struct OrderService {
    db: Arc<Database>,
}

impl OrderService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create one order at a position and instant, priced with the tax
    /// rate valid there and then. The timestamp defaults to now.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<Order, AppError> {
        request.validate()?;
        if request.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order amount must be positive"
            )));
        }

        let timestamp = request.timestamp.unwrap_or_else(Utc::now);
        let rate = self
            .resolve_rate(request.latitude, request.longitude, timestamp)
            .await?;
        let amount_with_tax = amount_with_tax(request.amount, rate.total_rate)
            .ok_or_else(|| untaxable(request.amount, rate.total_rate))?;

        let now = Utc::now();
        let order = NewOrder {
            id: Uuid::new_v4(),
            order_number: order_number::anonymous(&user_id, timestamp),
            user_id,
            amount: request.amount,
            amount_with_tax,
            latitude: request.latitude,
            longitude: request.longitude,
            tax_rates_id: rate.id,
            timestamp,
            created_at: now,
            updated_at: now,
        };

        let created = self.db.insert_order(&order).await?;
        record_order_operation("create");
        info!(order_id = %created.id, order_number = %created.order_number, "Order created");
        Ok(created)
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, AppError> {
        let order = self.db.get_order(user_id, order_id).await?;
        record_order_operation("get");
        Ok(order)
    }

    /// Edit an order. A new position or time re-resolves the rate and
    /// recomputes the taxed amount; the order number never changes.
    #[instrument(skip(self, request), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn update_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        request: UpdateOrderRequest,
    ) -> Result<Order, AppError> {
        request.validate()?;
        if request.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order amount must be positive"
            )));
        }

        let existing = self.db.get_order(user_id, order_id).await?;
        let timestamp = request.timestamp.unwrap_or(existing.timestamp);
        let rate = self
            .resolve_rate(request.latitude, request.longitude, timestamp)
            .await?;
        let amount_with_tax = amount_with_tax(request.amount, rate.total_rate)
            .ok_or_else(|| untaxable(request.amount, rate.total_rate))?;

        let changes = OrderChanges {
            amount: request.amount,
            amount_with_tax,
            latitude: request.latitude,
            longitude: request.longitude,
            tax_rates_id: rate.id,
            timestamp,
        };

        let updated = self.db.update_order(user_id, order_id, &changes).await?;
        record_order_operation("update");
        info!(order_id = %updated.id, "Order updated");
        Ok(updated)
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn delete_order(&self, user_id: Uuid, order_id: Uuid) -> Result<(), AppError> {
        self.db.delete_order(user_id, order_id).await?;
        record_order_operation("delete");
        info!(order_id = %order_id, "Order deleted");
        Ok(())
    }

    async fn resolve_rate(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<TaxRate, AppError> {
        self.db
            .resolve_rate_for_point(latitude, longitude, timestamp)
            .await?
            .ok_or_else(|| not_serviceable(latitude, longitude, timestamp))
    }
}

/// No jurisdiction covers this position at this instant.
fn not_serviceable(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> AppError {
    AppError::UnprocessableEntity(anyhow::anyhow!(
        "Location ({}, {}) is not serviceable at {}",
        latitude,
        longitude,
        timestamp
    ))
}

fn untaxable(amount: Decimal, total_rate: Decimal) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "Order amount {} is too large to tax at rate {}",
        amount,
        total_rate
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn test_unserviceable_location_is_unprocessable() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        let error = not_serviceable(40.0, 10.0, timestamp);
        assert!(matches!(error, AppError::UnprocessableEntity(_)));
        assert!(error.to_string().contains("not serviceable"));
    }

    #[test]
    fn test_untaxable_amount_is_a_client_error() {
        let rate = Decimal::from_str("0.08").unwrap();
        assert!(amount_with_tax(Decimal::MAX, rate).is_none());
        let error = untaxable(Decimal::MAX, rate);
        assert!(matches!(error, AppError::BadRequest(_)));
        assert!(error.to_string().contains("too large to tax"));
    }
}
