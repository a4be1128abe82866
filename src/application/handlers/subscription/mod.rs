//! Subscription handlers.
//!
//! ## Commands
//! - Starting the one-time free trial
//! - Purchasing a plan
//! - Cancelling (at period end or immediately)
//! - Processing gateway webhooks
//! - Managing stored cards
//!
//! ## Queries
//! - Subscription summary
//! - Premium access (advisory and blocking)
//! - Plan catalog

mod cancel_subscription;
mod check_access;
mod create_subscription;
mod get_subscription;
mod handle_gateway_webhook;
mod list_plans;
mod manage_payment_methods;
mod start_trial;

// Commands
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use create_subscription::{
    charge_idempotency_key, CreateSubscriptionCommand, CreateSubscriptionHandler,
    CreateSubscriptionResult,
};
pub use handle_gateway_webhook::{
    HandleGatewayWebhookCommand, HandleGatewayWebhookHandler, HandleGatewayWebhookResult,
    MAX_UPDATE_ATTEMPTS,
};
pub use manage_payment_methods::{
    AddCardCommand, DisableCardCommand, ListCardsQuery, ManagePaymentMethodsHandler,
};
pub use start_trial::{StartTrialCommand, StartTrialHandler, StartTrialResult, DEFAULT_TRIAL_DAYS};

// Queries
pub use check_access::{AccessMode, CheckAccessHandler, CheckAccessQuery, CheckAccessResult};
pub use get_subscription::{GetSubscriptionHandler, GetSubscriptionQuery, GetSubscriptionResult};
pub use list_plans::{ListPlansHandler, ListPlansQuery, ListPlansResult};

use crate::domain::foundation::{DomainError, ErrorCode, UserId};
use crate::domain::subscription::{SubscriptionError, UserAccount};
use crate::ports::UserAccountRepository;

/// Loads the account or fails with `UserNotFound`.
async fn load_user(
    users: &dyn UserAccountRepository,
    user_id: &UserId,
) -> Result<UserAccount, SubscriptionError> {
    users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| SubscriptionError::user_not_found(user_id.clone()))
}

/// Translates store-level conflicts into the caller's precondition error.
///
/// `on_conflict` picks the error for a lost race on the user's single
/// record (a concurrent insert, or a version bump between read and write).
fn map_write_error(
    err: DomainError,
    user_id: &UserId,
    on_conflict: fn(UserId) -> SubscriptionError,
) -> SubscriptionError {
    match err.code {
        ErrorCode::TrialAlreadyUsed => SubscriptionError::trial_already_used(user_id.clone()),
        ErrorCode::SubscriptionExists | ErrorCode::ConcurrentModification => {
            on_conflict(user_id.clone())
        }
        ErrorCode::UserNotFound => SubscriptionError::user_not_found(user_id.clone()),
        ErrorCode::SubscriptionNotFound => SubscriptionError::not_found(user_id.clone()),
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    #[test]
    fn store_conflicts_map_to_caller_choice() {
        let err = DomainError::new(ErrorCode::SubscriptionExists, "dup");
        assert!(matches!(
            map_write_error(err, &user(), SubscriptionError::duplicate_subscription),
            SubscriptionError::DuplicateSubscription(_)
        ));

        let err = DomainError::new(ErrorCode::TrialAlreadyUsed, "used");
        assert!(matches!(
            map_write_error(err, &user(), SubscriptionError::already_subscribed),
            SubscriptionError::TrialAlreadyUsed(_)
        ));
    }

    #[test]
    fn other_store_errors_are_infrastructure() {
        let err = DomainError::database("connection refused");
        assert!(matches!(
            map_write_error(err, &user(), SubscriptionError::already_subscribed),
            SubscriptionError::Infrastructure(_)
        ));
    }
}
