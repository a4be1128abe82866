//! Plans, cadences and the plan catalog.
//!
//! A plan id is what clients send ("monthly-plan"); the catalog resolves it
//! to the price and the entitlement it buys.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::{Timestamp, ValidationError};

/// Entitlement tier recorded on the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Free,
    PremiumMonthly,
    PremiumYearly,
}

impl PlanType {
    pub fn is_paid(&self) -> bool {
        self.as_paid().is_some()
    }

    /// The paid plan this tier corresponds to, if any.
    pub fn as_paid(&self) -> Option<PaidPlan> {
        match self {
            PlanType::Free => None,
            PlanType::PremiumMonthly => Some(PaidPlan::PremiumMonthly),
            PlanType::PremiumYearly => Some(PaidPlan::PremiumYearly),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::PremiumMonthly => "premium_monthly",
            PlanType::PremiumYearly => "premium_yearly",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "free" => Ok(PlanType::Free),
            "premium_monthly" => Ok(PlanType::PremiumMonthly),
            "premium_yearly" => Ok(PlanType::PremiumYearly),
            other => Err(ValidationError::invalid_format(
                "plan_type",
                format!("unknown plan type '{}'", other),
            )),
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tier that is billed. Paid entitlement states carry this rather than
/// [`PlanType`] so a "paid free plan" cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidPlan {
    PremiumMonthly,
    PremiumYearly,
}

impl PaidPlan {
    pub fn cadence(&self) -> Cadence {
        match self {
            PaidPlan::PremiumMonthly => Cadence::Monthly,
            PaidPlan::PremiumYearly => Cadence::Annual,
        }
    }
}

impl From<PaidPlan> for PlanType {
    fn from(plan: PaidPlan) -> Self {
        match plan {
            PaidPlan::PremiumMonthly => PlanType::PremiumMonthly,
            PaidPlan::PremiumYearly => PlanType::PremiumYearly,
        }
    }
}

/// Billing interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cadence {
    Monthly,
    Annual,
}

impl Cadence {
    /// End of a billing period that starts at `start`.
    pub fn period_end(&self, start: Timestamp) -> Timestamp {
        match self {
            Cadence::Monthly => start.add_months(1),
            Cadence::Annual => start.add_years(1),
        }
    }

    /// Start of a billing period that ends at `end`.
    pub fn period_start(&self, end: Timestamp) -> Timestamp {
        match self {
            Cadence::Monthly => end.minus_months(1),
            Cadence::Annual => end.minus_years(1),
        }
    }
}

/// Everything needed to charge for and grant a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDescriptor {
    pub id: String,
    pub name: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub plan_type: PaidPlan,
    pub cadence: Cadence,
    /// Gateway catalog entry that bills renewals. Without one, a purchase
    /// covers a single period.
    #[serde(default)]
    pub gateway_plan_id: Option<String>,
}

impl PlanDescriptor {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::empty_field("plans.id"));
        }
        if self.amount_minor_units <= 0 {
            return Err(ValidationError::out_of_range(
                format!("plans.{}.amount_minor_units", self.id),
                1,
                i64::MAX,
                self.amount_minor_units,
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::invalid_format(
                format!("plans.{}.currency", self.id),
                "expected an ISO 4217 code such as USD",
            ));
        }
        if self.plan_type.cadence() != self.cadence {
            return Err(ValidationError::invalid_format(
                format!("plans.{}.cadence", self.id),
                format!("{:?} does not bill {:?}", self.cadence, self.plan_type),
            ));
        }
        Ok(())
    }
}

static DEFAULT_PLANS: Lazy<Vec<PlanDescriptor>> = Lazy::new(|| {
    vec![
        PlanDescriptor {
            id: "monthly-plan".to_string(),
            name: "Premium Monthly".to_string(),
            amount_minor_units: 999,
            currency: "USD".to_string(),
            plan_type: PaidPlan::PremiumMonthly,
            cadence: Cadence::Monthly,
            gateway_plan_id: None,
        },
        PlanDescriptor {
            id: "yearly-plan".to_string(),
            name: "Premium Yearly".to_string(),
            amount_minor_units: 7999,
            currency: "USD".to_string(),
            plan_type: PaidPlan::PremiumYearly,
            cadence: Cadence::Annual,
            gateway_plan_id: None,
        },
    ]
});

#[derive(Debug, Error)]
pub enum PlanCatalogError {
    #[error("Failed to read plan file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse plan file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid plan: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    plans: Vec<PlanDescriptor>,
}

/// Plan id → descriptor lookup.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: BTreeMap<String, PlanDescriptor>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<PlanDescriptor>) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for plan in plans {
            plan.validate()?;
            if map.contains_key(&plan.id) {
                return Err(ValidationError::invalid_format(
                    "plans.id",
                    format!("duplicate plan id '{}'", plan.id),
                ));
            }
            map.insert(plan.id.clone(), plan);
        }
        if map.is_empty() {
            return Err(ValidationError::empty_field("plans"));
        }
        Ok(Self { plans: map })
    }

    /// Parses a catalog from YAML of the form `plans: [ {id, name, ...} ]`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PlanCatalogError> {
        let file: PlanFile = serde_yaml::from_str(yaml)?;
        Ok(Self::new(file.plans)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PlanCatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn resolve(&self, plan_id: &str) -> Option<&PlanDescriptor> {
        self.plans.get(plan_id)
    }

    /// Tier for a plan id; unknown ids are `free`.
    pub fn plan_type_from_id(&self, plan_id: &str) -> PlanType {
        self.resolve(plan_id)
            .map(|plan| plan.plan_type.into())
            .unwrap_or(PlanType::Free)
    }

    pub fn plans(&self) -> impl Iterator<Item = &PlanDescriptor> {
        self.plans.values()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: DEFAULT_PLANS
                .iter()
                .map(|plan| (plan.id.clone(), plan.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_catalog_resolves_both_plans() {
        let catalog = PlanCatalog::default();

        let monthly = catalog.resolve("monthly-plan").unwrap();
        assert_eq!(monthly.amount_minor_units, 999);
        assert_eq!(monthly.cadence, Cadence::Monthly);
        assert_eq!(monthly.plan_type, PaidPlan::PremiumMonthly);

        let yearly = catalog.resolve("yearly-plan").unwrap();
        assert_eq!(yearly.cadence, Cadence::Annual);
    }

    #[test]
    fn plan_type_from_id_defaults_to_free() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.plan_type_from_id("monthly-plan"), PlanType::PremiumMonthly);
        assert_eq!(catalog.plan_type_from_id("yearly-plan"), PlanType::PremiumYearly);
        assert_eq!(catalog.plan_type_from_id("lifetime"), PlanType::Free);
    }

    #[test]
    fn default_plans_pass_validation() {
        assert!(PlanCatalog::new(DEFAULT_PLANS.clone()).is_ok());
    }

    #[test]
    fn catalog_rejects_mismatched_cadence() {
        let mut plan = DEFAULT_PLANS[0].clone();
        plan.cadence = Cadence::Annual;
        assert!(PlanCatalog::new(vec![plan]).is_err());
    }

    #[test]
    fn catalog_rejects_non_positive_amount() {
        let mut plan = DEFAULT_PLANS[0].clone();
        plan.amount_minor_units = 0;
        assert!(matches!(
            PlanCatalog::new(vec![plan]),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn catalog_rejects_duplicate_ids() {
        let plan = DEFAULT_PLANS[0].clone();
        assert!(PlanCatalog::new(vec![plan.clone(), plan]).is_err());
    }

    #[test]
    fn catalog_loads_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
plans:
  - id: studio-monthly
    name: Studio Monthly
    amount_minor_units: 1299
    currency: EUR
    plan_type: premium_monthly
    cadence: MONTHLY
    gateway_plan_id: SQ-VARIATION-1
"#
        )
        .unwrap();

        let catalog = PlanCatalog::from_yaml_file(file.path()).unwrap();
        let plan = catalog.resolve("studio-monthly").unwrap();
        assert_eq!(plan.currency, "EUR");
        assert_eq!(plan.amount_minor_units, 1299);
        assert_eq!(plan.gateway_plan_id.as_deref(), Some("SQ-VARIATION-1"));
        assert!(catalog.resolve("monthly-plan").is_none());
    }

    #[test]
    fn catalog_yaml_with_unknown_plan_type_fails_to_parse() {
        let yaml = r#"
plans:
  - id: x
    name: X
    amount_minor_units: 100
    currency: USD
    plan_type: premium_weekly
    cadence: MONTHLY
"#;
        assert!(matches!(
            PlanCatalog::from_yaml_str(yaml),
            Err(PlanCatalogError::Parse(_))
        ));
    }

    #[test]
    fn plan_type_parse_round_trips_names() {
        for plan in [PlanType::Free, PlanType::PremiumMonthly, PlanType::PremiumYearly] {
            assert_eq!(PlanType::parse(plan.as_str()).unwrap(), plan);
        }
        assert!(PlanType::parse("gold").is_err());
    }
}
