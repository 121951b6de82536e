//! Services module for order-service.

pub mod database;
pub mod import;
pub mod metrics;
pub mod order_number;
pub mod orders;

pub use database::{Database, OrderStore};
pub use import::ImportService;
pub use metrics::{
    get_metrics, init_metrics, observe_import_duration, record_import, record_import_rows,
    record_order_operation,
};
pub use orders::OrderService;
