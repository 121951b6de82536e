//! Base configuration shared by every service.

use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings common to all services. Service crates wrap this with their
/// own configuration struct and read their specific variables on top.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load from an optional `configuration` file, overridden by
    /// `APP__`-prefixed environment variables.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_defaults_when_unset() {
        let empty = Cfg::builder().build().unwrap();
        let config: Config = empty.try_deserialize().unwrap();
        assert_eq!(config.port, 8080);
    }
}
