//! HTTP DTOs for subscription endpoints.
//!
//! These types define the JSON request/response structure for the subscription API.
//! Timestamps are rendered as RFC 3339 strings.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    AccessDenial, AccessInfo, Cadence, PaidPlan, PlanDescriptor, PlanType, SubscriptionStatus,
    SubscriptionSummary, SuggestedAction, UserSubscriptionStatus, WebhookOutcome,
};
use crate::ports::{ChargeReceipt, StoredCard};

fn rfc3339(ts: Timestamp) -> String {
    ts.as_datetime().to_rfc3339()
}

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start the free trial.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartTrialRequest {
    /// Trial length in days; the configured default when absent.
    #[serde(default)]
    pub trial_days: Option<i64>,
}

/// Request to purchase a plan.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    /// Card nonce or stored card id.
    pub payment_method_id: String,
    /// Client retry key; the same key with the same plan never charges twice.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Request to cancel.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default = "default_true")]
    pub cancel_at_period_end: bool,
}

impl Default for CancelSubscriptionRequest {
    fn default() -> Self {
        Self {
            cancel_at_period_end: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Request to store a card on file.
#[derive(Debug, Clone, Deserialize)]
pub struct AddCardRequest {
    /// Card nonce from the client SDK.
    pub source_id: String,
    #[serde(default)]
    pub cardholder_name: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummaryResponse {
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub has_premium_access: bool,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub is_trial_active: bool,
    pub trial_end: Option<String>,
}

impl From<SubscriptionSummary> for SubscriptionSummaryResponse {
    fn from(summary: SubscriptionSummary) -> Self {
        Self {
            plan_type: summary.plan_type,
            status: summary.status,
            has_premium_access: summary.has_premium_access,
            current_period_end: summary.current_period_end.map(rfc3339),
            cancel_at_period_end: summary.cancel_at_period_end,
            is_trial_active: summary.is_trial_active,
            trial_end: summary.trial_end.map(rfc3339),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessResponse {
    pub has_premium_access: bool,
    pub subscription_status: UserSubscriptionStatus,
    pub premium_access_until: Option<String>,
}

impl From<AccessInfo> for AccessResponse {
    fn from(access: AccessInfo) -> Self {
        Self {
            has_premium_access: access.has_premium_access,
            subscription_status: access.status,
            premium_access_until: access.premium_access_until.map(rfc3339),
        }
    }
}

/// Response for `GET /subscriptions/me`.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    /// The record summary, or null if the user never had one.
    pub subscription: Option<SubscriptionSummaryResponse>,
    pub access: AccessResponse,
    pub trial_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialResponse {
    pub subscription: SubscriptionSummaryResponse,
    pub premium_access_until: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeResponse {
    pub charge_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
}

impl From<ChargeReceipt> for ChargeResponse {
    fn from(receipt: ChargeReceipt) -> Self {
        Self {
            charge_id: receipt.charge_id,
            amount_minor_units: receipt.amount.amount_minor_units,
            currency: receipt.amount.currency,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSubscriptionResponse {
    pub subscription: SubscriptionSummaryResponse,
    pub charge: ChargeResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelSubscriptionResponse {
    pub subscription: SubscriptionSummaryResponse,
    /// When premium access stops; null when it already has.
    pub access_until: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub plan_type: PaidPlan,
    pub cadence: Cadence,
}

impl From<PlanDescriptor> for PlanResponse {
    fn from(plan: PlanDescriptor) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            amount_minor_units: plan.amount_minor_units,
            currency: plan.currency,
            plan_type: plan.plan_type,
            cadence: plan.cadence,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<PlanResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardResponse {
    pub id: String,
    pub last4: String,
    pub brand: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub enabled: bool,
}

impl From<StoredCard> for CardResponse {
    fn from(card: StoredCard) -> Self {
        Self {
            id: card.id,
            last4: card.last4,
            brand: card.brand,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            enabled: card.enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CardsResponse {
    pub cards: Vec<CardResponse>,
}

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAckResponse {
    pub received: bool,
    pub event_id: String,
    pub outcome: WebhookOutcome,
    pub duplicate: bool,
}

/// Diagnostics attached to a 403 from the access gate.
#[derive(Debug, Clone, Serialize)]
pub struct PremiumRequiredDetails {
    pub current_plan: UserSubscriptionStatus,
    pub trial_used: bool,
    pub has_subscription_record: bool,
    pub premium_access_until: Option<String>,
    pub suggested_action: SuggestedAction,
}

impl From<AccessDenial> for PremiumRequiredDetails {
    fn from(denial: AccessDenial) -> Self {
        Self {
            current_plan: denial.current_plan,
            trial_used: denial.trial_used,
            has_subscription_record: denial.has_subscription_record,
            premium_access_until: denial.premium_access_until.map(rfc3339),
            suggested_action: denial.suggested_action(),
        }
    }
}

/// Standard error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}
