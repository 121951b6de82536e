//! Order Service - CSV order import with point-in-time tax resolution.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
