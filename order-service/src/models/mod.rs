//! Domain models for order-service.

mod csv_record;
mod import;
mod order;
mod tax_rate;

pub use csv_record::CsvRecord;
pub use import::{ImportError, ImportResult};
pub use order::{
    CreateOrderRequest, NewOrder, Order, OrderChanges, UpdateOrderRequest, amount_with_tax,
};
pub use tax_rate::{RatePoint, ResolvedRate, TaxRate};
