//! Subscription-specific error types.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | InvalidInput | 400 |
//! | InvalidPlan | 400 |
//! | TrialAlreadyUsed | 409 |
//! | AlreadySubscribed | 409 |
//! | DuplicateSubscription | 409 |
//! | InvalidState | 409 |
//! | SubscriptionNotFound | 404 |
//! | UserNotFound | 404 |
//! | PaymentFailed | 402 |
//! | PremiumRequired | 403 |
//! | InvalidWebhookSignature | 401 |
//! | Infrastructure | 500 |

use super::access::AccessDenial;
use crate::domain::foundation::{DomainError, ErrorCode, UserId, ValidationError};

/// Subscription-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Malformed request data, such as a non-positive trial length.
    InvalidInput { field: String, message: String },

    /// Plan id is not in the catalog.
    InvalidPlan(String),

    /// The user has already had their one trial.
    TrialAlreadyUsed(UserId),

    /// A trial was requested while a paid plan is active or pending.
    AlreadySubscribed(UserId),

    /// A purchase was requested while a paid plan is active or pending.
    DuplicateSubscription(UserId),

    SubscriptionNotFound(UserId),

    UserNotFound(UserId),

    /// The gateway declined, errored or timed out. Nothing was changed.
    PaymentFailed { reason: String },

    /// Access-gate denial with enough context to pick an upsell.
    PremiumRequired(AccessDenial),

    InvalidState { current: String, attempted: String },

    InvalidWebhookSignature,

    Infrastructure(String),
}

impl SubscriptionError {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        SubscriptionError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_plan(plan_id: impl Into<String>) -> Self {
        SubscriptionError::InvalidPlan(plan_id.into())
    }

    pub fn trial_already_used(user_id: UserId) -> Self {
        SubscriptionError::TrialAlreadyUsed(user_id)
    }

    pub fn already_subscribed(user_id: UserId) -> Self {
        SubscriptionError::AlreadySubscribed(user_id)
    }

    pub fn duplicate_subscription(user_id: UserId) -> Self {
        SubscriptionError::DuplicateSubscription(user_id)
    }

    pub fn not_found(user_id: UserId) -> Self {
        SubscriptionError::SubscriptionNotFound(user_id)
    }

    pub fn user_not_found(user_id: UserId) -> Self {
        SubscriptionError::UserNotFound(user_id)
    }

    pub fn payment_failed(reason: impl Into<String>) -> Self {
        SubscriptionError::PaymentFailed {
            reason: reason.into(),
        }
    }

    pub fn premium_required(denial: AccessDenial) -> Self {
        SubscriptionError::PremiumRequired(denial)
    }

    pub fn invalid_state(current: impl Into<String>, attempted: impl Into<String>) -> Self {
        SubscriptionError::InvalidState {
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        SubscriptionError::Infrastructure(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::InvalidInput { .. } => ErrorCode::ValidationFailed,
            SubscriptionError::InvalidPlan(_) => ErrorCode::InvalidPlan,
            SubscriptionError::TrialAlreadyUsed(_) => ErrorCode::TrialAlreadyUsed,
            SubscriptionError::AlreadySubscribed(_)
            | SubscriptionError::DuplicateSubscription(_) => ErrorCode::SubscriptionExists,
            SubscriptionError::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
            SubscriptionError::UserNotFound(_) => ErrorCode::UserNotFound,
            SubscriptionError::PaymentFailed { .. } => ErrorCode::PaymentFailed,
            SubscriptionError::PremiumRequired(_) => ErrorCode::PremiumRequired,
            SubscriptionError::InvalidState { .. } => ErrorCode::InvalidStateTransition,
            SubscriptionError::InvalidWebhookSignature => ErrorCode::InvalidWebhookSignature,
            SubscriptionError::Infrastructure(_) => ErrorCode::InternalError,
        }
    }

    /// Returns a user-facing message. Gateway detail stays in the logs.
    pub fn message(&self) -> String {
        match self {
            SubscriptionError::InvalidInput { field, message } => {
                format!("Invalid value for '{}': {}", field, message)
            }
            SubscriptionError::InvalidPlan(plan_id) => format!("Unknown plan: {}", plan_id),
            SubscriptionError::TrialAlreadyUsed(_) => {
                "The free trial has already been used on this account".to_string()
            }
            SubscriptionError::AlreadySubscribed(_) => {
                "A paid subscription is already active, no trial needed".to_string()
            }
            SubscriptionError::DuplicateSubscription(_) => {
                "A subscription is already active or pending for this account".to_string()
            }
            SubscriptionError::SubscriptionNotFound(user_id) => {
                format!("No subscription found for user: {}", user_id)
            }
            SubscriptionError::UserNotFound(user_id) => format!("User not found: {}", user_id),
            SubscriptionError::PaymentFailed { .. } => {
                "The payment could not be completed. No charge was applied to your subscription."
                    .to_string()
            }
            SubscriptionError::PremiumRequired(_) => {
                "A premium subscription is required".to_string()
            }
            SubscriptionError::InvalidState { current, attempted } => {
                format!("Cannot {} a subscription that is {}", attempted, current)
            }
            SubscriptionError::InvalidWebhookSignature => "Invalid webhook signature".to_string(),
            SubscriptionError::Infrastructure(_) => "Internal error".to_string(),
        }
    }

    /// Returns true if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::Infrastructure(_) | SubscriptionError::PaymentFailed { .. }
        )
    }
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionError::PaymentFailed { reason } => write!(f, "Payment failed: {}", reason),
            SubscriptionError::Infrastructure(msg) => write!(f, "Infrastructure error: {}", msg),
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for SubscriptionError {}

impl From<DomainError> for SubscriptionError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed => SubscriptionError::InvalidInput {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            ErrorCode::InvalidStateTransition => SubscriptionError::InvalidState {
                current: "unknown".to_string(),
                attempted: err.message,
            },
            _ => SubscriptionError::Infrastructure(err.to_string()),
        }
    }
}

impl From<ValidationError> for SubscriptionError {
    fn from(err: ValidationError) -> Self {
        DomainError::from(err).into()
    }
}

impl From<SubscriptionError> for DomainError {
    fn from(err: SubscriptionError) -> Self {
        DomainError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::UserSubscriptionStatus;

    fn user() -> UserId {
        UserId::new("user-test-123").unwrap()
    }

    #[test]
    fn precondition_errors_map_to_conflict_codes() {
        assert_eq!(
            SubscriptionError::trial_already_used(user()).code(),
            ErrorCode::TrialAlreadyUsed
        );
        assert_eq!(
            SubscriptionError::already_subscribed(user()).code(),
            ErrorCode::SubscriptionExists
        );
        assert_eq!(
            SubscriptionError::duplicate_subscription(user()).code(),
            ErrorCode::SubscriptionExists
        );
    }

    #[test]
    fn payment_failure_message_hides_gateway_detail() {
        let err = SubscriptionError::payment_failed("CARD_DECLINED_VERIFICATION_REQUIRED");
        assert!(!err.message().contains("CARD_DECLINED"));
        assert!(err.to_string().contains("CARD_DECLINED"));
        assert!(err.is_retryable());
    }

    #[test]
    fn infrastructure_message_is_generic() {
        let err = SubscriptionError::infrastructure("pool timed out");
        assert_eq!(err.message(), "Internal error");
        assert!(err.to_string().contains("pool timed out"));
    }

    #[test]
    fn premium_required_carries_denial() {
        let denial = AccessDenial {
            current_plan: UserSubscriptionStatus::Free,
            trial_used: false,
            has_subscription_record: false,
            premium_access_until: None,
        };
        let err = SubscriptionError::premium_required(denial);
        assert_eq!(err.code(), ErrorCode::PremiumRequired);
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_domain_error_becomes_invalid_input() {
        let err: SubscriptionError = DomainError::validation("trial_days", "must be positive").into();
        assert_eq!(
            err,
            SubscriptionError::invalid_input("trial_days", "must be positive")
        );
    }

    #[test]
    fn database_error_becomes_infrastructure() {
        let err: SubscriptionError = DomainError::database("connection refused").into();
        assert!(matches!(err, SubscriptionError::Infrastructure(_)));
    }
}
