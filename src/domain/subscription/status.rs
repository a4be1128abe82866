//! Subscription status state machine and the user-side status cache.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, ValidationError};

/// Status of an entitlement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Trialing or paid and in good standing.
    Active,

    /// No entitlement; also used for paused or deactivated gateway subscriptions.
    Inactive,

    /// Cancelled by the user or by the gateway.
    Cancelled,

    /// The gateway could not collect the latest invoice.
    PastDue,

    /// Awaiting the first successful charge.
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "pending" => Ok(SubscriptionStatus::Pending),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown subscription status '{}'", other),
            )),
        }
    }

    /// Maps the gateway's status vocabulary (case-insensitive).
    pub fn from_gateway(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "pending" => Ok(SubscriptionStatus::Pending),
            "canceled" | "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "past_due" | "delinquent" => Ok(SubscriptionStatus::PastDue),
            "paused" | "deactivated" | "inactive" => Ok(SubscriptionStatus::Inactive),
            other => Err(ValidationError::invalid_format(
                "subscription.status",
                format!("unrecognised gateway status '{}'", other),
            )),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Inactive, Active)
                | (Inactive, Pending)
                | (Inactive, Cancelled)
                | (Inactive, Inactive)
                | (Pending, Active)
                | (Pending, Inactive)
                | (Pending, Cancelled)
                | (Pending, Pending)
                | (Active, Active) // renewal
                | (Active, PastDue)
                | (Active, Cancelled)
                | (Active, Inactive)
                | (PastDue, Active)
                | (PastDue, Cancelled)
                | (PastDue, Inactive)
                | (PastDue, PastDue)
                | (Cancelled, Active) // resubscribe or gateway reactivation
                | (Cancelled, Pending)
                | (Cancelled, Inactive)
                | (Cancelled, Cancelled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Inactive => vec![Active, Pending, Cancelled, Inactive],
            Pending => vec![Active, Inactive, Cancelled, Pending],
            Active => vec![Active, PastDue, Cancelled, Inactive],
            PastDue => vec![Active, Cancelled, Inactive, PastDue],
            Cancelled => vec![Active, Pending, Inactive, Cancelled],
        }
    }
}

/// Status cached on the user account for fast access checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSubscriptionStatus {
    Free,
    Trial,
    PremiumMonthly,
    PremiumYearly,
    Cancelled,
}

impl UserSubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserSubscriptionStatus::Free => "free",
            UserSubscriptionStatus::Trial => "trial",
            UserSubscriptionStatus::PremiumMonthly => "premium_monthly",
            UserSubscriptionStatus::PremiumYearly => "premium_yearly",
            UserSubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "free" => Ok(UserSubscriptionStatus::Free),
            "trial" => Ok(UserSubscriptionStatus::Trial),
            "premium_monthly" => Ok(UserSubscriptionStatus::PremiumMonthly),
            "premium_yearly" => Ok(UserSubscriptionStatus::PremiumYearly),
            "cancelled" => Ok(UserSubscriptionStatus::Cancelled),
            other => Err(ValidationError::invalid_format(
                "subscription_status",
                format!("unknown user subscription status '{}'", other),
            )),
        }
    }
}

impl Default for UserSubscriptionStatus {
    fn default() -> Self {
        UserSubscriptionStatus::Free
    }
}

impl fmt::Display for UserSubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
