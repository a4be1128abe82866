//! CheckAccessHandler - Query handler for premium access.
//!
//! This is the hot path behind every premium content request. It reads
//! only the user's cached fields; the subscription record is consulted
//! only to build the diagnostics of a blocking denial.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{compute_access, AccessDenial, AccessInfo, SubscriptionError};
use crate::ports::{SubscriptionRepository, UserAccountRepository};

use super::load_user;

/// How a denial is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Return the access info; the caller decides per field what to show.
    Advisory,
    /// Fail with `PremiumRequired` when access is denied.
    Blocking,
}

#[derive(Debug, Clone)]
pub struct CheckAccessQuery {
    pub user_id: UserId,
    pub mode: AccessMode,
}

#[derive(Debug, Clone)]
pub struct CheckAccessResult {
    pub access: AccessInfo,
}

pub struct CheckAccessHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    users: Arc<dyn UserAccountRepository>,
}

impl CheckAccessHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        users: Arc<dyn UserAccountRepository>,
    ) -> Self {
        Self {
            subscriptions,
            users,
        }
    }

    pub async fn handle(&self, query: CheckAccessQuery) -> Result<CheckAccessResult, SubscriptionError> {
        let user = load_user(self.users.as_ref(), &query.user_id).await?;
        let access = compute_access(&user, Timestamp::now());

        if query.mode == AccessMode::Blocking && !access.has_premium_access {
            let has_record = self
                .subscriptions
                .find_by_user_id(&query.user_id)
                .await?
                .is_some();
            let denial = AccessDenial::for_user(&user, has_record);
            tracing::debug!(
                user_id = %query.user_id,
                suggested = ?denial.suggested_action(),
                "Premium access denied"
            );
            return Err(SubscriptionError::premium_required(denial));
        }

        Ok(CheckAccessResult { access })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAccountStore;
    use crate::domain::foundation::SubscriptionId;
    use crate::domain::subscription::{
        Subscription, SuggestedAction, UserAccount, UserSubscriptionStatus,
    };

    fn user_id() -> UserId {
        UserId::new("reader").unwrap()
    }

    async fn handler_with(user: UserAccount) -> (Arc<InMemoryAccountStore>, CheckAccessHandler) {
        let store = Arc::new(InMemoryAccountStore::new());
        store.insert_user(user).await;
        (store.clone(), CheckAccessHandler::new(store.clone(), store))
    }

    fn query(mode: AccessMode) -> CheckAccessQuery {
        CheckAccessQuery {
            user_id: user_id(),
            mode,
        }
    }

    #[tokio::test]
    async fn advisory_mode_never_fails_on_denial() {
        let (_store, handler) = handler_with(UserAccount::new(user_id())).await;

        let result = handler.handle(query(AccessMode::Advisory)).await.unwrap();

        assert!(!result.access.has_premium_access);
        assert_eq!(result.access.status, UserSubscriptionStatus::Free);
    }

    #[tokio::test]
    async fn blocking_denial_suggests_trial_for_new_users() {
        let (_store, handler) = handler_with(UserAccount::new(user_id())).await;

        let err = handler.handle(query(AccessMode::Blocking)).await.unwrap_err();

        match err {
            SubscriptionError::PremiumRequired(denial) => {
                assert!(!denial.trial_used);
                assert!(!denial.has_subscription_record);
                assert_eq!(denial.suggested_action(), SuggestedAction::StartTrial);
            }
            other => panic!("expected PremiumRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn expired_trial_suggests_resubscribe() {
        let (store, handler) = handler_with(UserAccount::new(user_id())).await;
        let trial = Subscription::start_trial(
            SubscriptionId::new(),
            user_id(),
            7,
            Timestamp::now().minus_days(10),
        );
        store.insert(&trial, trial.access_cache(true)).await.unwrap();

        let err = handler.handle(query(AccessMode::Blocking)).await.unwrap_err();

        match err {
            SubscriptionError::PremiumRequired(denial) => {
                assert_eq!(denial.current_plan, UserSubscriptionStatus::Trial);
                assert!(denial.trial_used);
                assert!(denial.has_subscription_record);
                assert_eq!(denial.suggested_action(), SuggestedAction::Resubscribe);
            }
            other => panic!("expected PremiumRequired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn active_trial_passes_blocking_gate() {
        let (store, handler) = handler_with(UserAccount::new(user_id())).await;
        let trial = Subscription::start_trial(SubscriptionId::new(), user_id(), 7, Timestamp::now());
        store.insert(&trial, trial.access_cache(true)).await.unwrap();

        let result = handler.handle(query(AccessMode::Blocking)).await.unwrap();

        assert!(result.access.has_premium_access);
    }
}
