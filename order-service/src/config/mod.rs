//! Configuration module for order-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Rows per resolver query and per bulk load.
    pub batch_size: usize,
}

impl OrderServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "order-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            import: ImportConfig {
                batch_size: env::var("IMPORT_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|&n| n > 0)
                    .unwrap_or(500),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/orders_test");
        std::env::remove_var("SERVICE_NAME");
        std::env::remove_var("IMPORT_BATCH_SIZE");
        std::env::remove_var("DATABASE_MAX_CONNECTIONS");

        let config = OrderServiceConfig::from_env().unwrap();
        assert_eq!(config.service_name, "order-service");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.min_connections, 2);
        assert_eq!(config.import.batch_size, 500);

        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/orders_test");
        std::env::set_var("SERVICE_NAME", "order-service-test");
        std::env::set_var("IMPORT_BATCH_SIZE", "50");

        let config = OrderServiceConfig::from_env().unwrap();
        assert_eq!(config.service_name, "order-service-test");
        assert_eq!(config.import.batch_size, 50);

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("SERVICE_NAME");
        std::env::remove_var("IMPORT_BATCH_SIZE");
    }

    #[test]
    #[serial]
    fn test_missing_database_url_is_an_error() {
        std::env::remove_var("DATABASE_URL");

        let result = OrderServiceConfig::from_env();
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn test_invalid_batch_size_falls_back_to_default() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/orders_test");
        std::env::set_var("IMPORT_BATCH_SIZE", "0");

        let config = OrderServiceConfig::from_env().unwrap();
        assert_eq!(config.import.batch_size, 500);

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("IMPORT_BATCH_SIZE");
    }
}
