//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables use the `STITCHBOOK` prefix and
//! `__` between nested keys.
//!
//! # Example
//!
//! ```no_run
//! use stitchbook::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod features;
mod payment;
mod server;
mod subscription;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use features::FeatureFlags;
pub use payment::{PaymentConfig, PaymentProvider};
pub use server::{Environment, LogFormat, ServerConfig};
pub use subscription::SubscriptionConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, logging)
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (PostgreSQL connection)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Payment gateway configuration (Square)
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Trial length, plan catalog, ledger retention
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Feature flags
    #[serde(default)]
    pub features: FeatureFlags,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with the `STITCHBOOK` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// - `STITCHBOOK__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `STITCHBOOK__PAYMENT__SQUARE_LOCATION_ID=...` -> `payment.square_location_id`
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("STITCHBOOK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// The database section is only checked when PostgreSQL is in use.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        if !self.features.in_memory_store {
            self.database.validate()?;
        }
        self.payment.validate(self.is_production())?;
        self.subscription.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[(&str, &str)] = &[
        ("STITCHBOOK__DATABASE__URL", "postgresql://test@localhost/test"),
        ("STITCHBOOK__PAYMENT__SQUARE_ACCESS_TOKEN", "EAAAl-test"),
        ("STITCHBOOK__PAYMENT__SQUARE_LOCATION_ID", "LOC-1"),
    ];

    fn with_env<T>(extra: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        for (k, v) in VARS.iter().chain(extra) {
            env::set_var(k, v);
        }
        let result = f();
        for (k, _) in VARS.iter().chain(extra) {
            env::remove_var(k);
        }
        result
    }

    #[test]
    fn test_load_from_environment() {
        let config = with_env(&[], AppConfig::load).unwrap();

        assert_eq!(config.database.url, "postgresql://test@localhost/test");
        assert_eq!(config.payment.square_location_id.as_deref(), Some("LOC-1"));
        assert_eq!(config.subscription.default_trial_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_values_parse() {
        let config = with_env(
            &[
                ("STITCHBOOK__SERVER__PORT", "3000"),
                ("STITCHBOOK__SUBSCRIPTION__DEFAULT_TRIAL_DAYS", "14"),
            ],
            AppConfig::load,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.subscription.default_trial_days, 14);
    }

    #[test]
    fn test_production_without_signature_key_is_invalid() {
        let config = with_env(&[("STITCHBOOK__SERVER__ENVIRONMENT", "production")], AppConfig::load)
            .unwrap();

        assert!(config.is_production());
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("PAYMENT__WEBHOOK_SIGNATURE_KEY"))
        );
    }

    #[test]
    fn test_in_memory_store_skips_database_validation() {
        let config = AppConfig {
            payment: PaymentConfig {
                provider: PaymentProvider::Mock,
                ..Default::default()
            },
            features: FeatureFlags {
                in_memory_store: true,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_ok());
    }
}
