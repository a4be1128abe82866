//! Payment gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::square::SquareEnvironment;

/// Which gateway implementation to wire in.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    #[default]
    Square,
    /// In-process gateway that approves everything. Development only.
    Mock,
}

/// Payment configuration (Square)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub provider: PaymentProvider,

    /// Square access token
    pub square_access_token: Option<SecretString>,

    /// Square location charges are booked against
    pub square_location_id: Option<String>,

    pub square_environment: SquareEnvironment,

    /// Webhook signature key; verification is skipped when absent
    pub webhook_signature_key: Option<SecretString>,

    /// URL registered with Square for webhooks, part of the signed payload
    pub webhook_notification_url: Option<String>,

    /// ISO 4217 currency for the built-in plans
    pub currency: String,

    /// Gateway request timeout in seconds
    pub request_timeout_secs: u64,
}

impl PaymentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Signature key and notification URL, when both are configured.
    pub fn webhook_verification(&self) -> Option<(&str, &str)> {
        match (&self.webhook_signature_key, &self.webhook_notification_url) {
            (Some(key), Some(url)) => Some((key.expose_secret().as_str(), url.as_str())),
            _ => None,
        }
    }

    /// Validate payment configuration
    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidCurrency);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 120 {
            return Err(ValidationError::InvalidTimeout);
        }

        match self.provider {
            PaymentProvider::Mock if production => {
                return Err(ValidationError::MockGatewayInProduction)
            }
            PaymentProvider::Mock => {}
            PaymentProvider::Square => {
                if self
                    .square_access_token
                    .as_ref()
                    .map_or(true, |t| t.expose_secret().is_empty())
                {
                    return Err(ValidationError::MissingRequired("PAYMENT__SQUARE_ACCESS_TOKEN"));
                }
                if self.square_location_id.as_deref().map_or(true, str::is_empty) {
                    return Err(ValidationError::MissingRequired("PAYMENT__SQUARE_LOCATION_ID"));
                }
            }
        }

        if self.webhook_signature_key.is_some() && self.webhook_notification_url.is_none() {
            return Err(ValidationError::MissingRequired("PAYMENT__WEBHOOK_NOTIFICATION_URL"));
        }
        if production {
            if self.webhook_signature_key.is_none() {
                return Err(ValidationError::MissingRequired("PAYMENT__WEBHOOK_SIGNATURE_KEY"));
            }
            if let Some(url) = &self.webhook_notification_url {
                if !url.starts_with("https://") {
                    return Err(ValidationError::NotificationUrlMustBeHttps);
                }
            }
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider: PaymentProvider::default(),
            square_access_token: None,
            square_location_id: None,
            square_environment: SquareEnvironment::default(),
            webhook_signature_key: None,
            webhook_notification_url: None,
            currency: "USD".to_string(),
            request_timeout_secs: 15,
        }
    }
}
