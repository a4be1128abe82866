//! Subscription behaviour configuration

use serde::Deserialize;
use std::path::PathBuf;

use super::error::ValidationError;
use crate::domain::subscription::{PlanCatalog, PlanCatalogError};

/// Subscription configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Trial length when the client does not ask for one
    pub default_trial_days: u32,

    /// YAML plan catalog replacing the built-in plans
    pub plans_file: Option<PathBuf>,

    /// Days processed webhook events are kept in the ledger
    pub webhook_retention_days: u32,
}

impl SubscriptionConfig {
    /// The configured plan catalog, or the built-in plans priced in
    /// `currency`.
    pub fn plan_catalog(&self, currency: &str) -> Result<PlanCatalog, PlanCatalogError> {
        match &self.plans_file {
            Some(path) => PlanCatalog::from_yaml_file(path),
            None => {
                let plans = PlanCatalog::default()
                    .plans()
                    .cloned()
                    .map(|mut plan| {
                        plan.currency = currency.to_string();
                        plan
                    })
                    .collect();
                Ok(PlanCatalog::new(plans)?)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_trial_days == 0 || self.default_trial_days > 365 {
            return Err(ValidationError::InvalidTrialDays);
        }
        Ok(())
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            default_trial_days: 7,
            plans_file: None,
            webhook_retention_days: 90,
        }
    }
}
