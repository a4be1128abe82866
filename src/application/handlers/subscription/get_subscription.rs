//! GetSubscriptionHandler - Query handler for the caller's subscription.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    compute_access, AccessInfo, SubscriptionError, SubscriptionSummary,
};
use crate::ports::{SubscriptionRepository, UserAccountRepository};

use super::load_user;

#[derive(Debug, Clone)]
pub struct GetSubscriptionQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct GetSubscriptionResult {
    /// `None` for users who never started a trial or bought a plan.
    pub subscription: Option<SubscriptionSummary>,
    pub access: AccessInfo,
    pub trial_used: bool,
}

pub struct GetSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    users: Arc<dyn UserAccountRepository>,
}

impl GetSubscriptionHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        users: Arc<dyn UserAccountRepository>,
    ) -> Self {
        Self {
            subscriptions,
            users,
        }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionQuery,
    ) -> Result<GetSubscriptionResult, SubscriptionError> {
        let user = load_user(self.users.as_ref(), &query.user_id).await?;
        let now = Timestamp::now();
        let subscription = self
            .subscriptions
            .find_by_user_id(&query.user_id)
            .await?
            .map(|record| record.summary(now));

        Ok(GetSubscriptionResult {
            subscription,
            access: compute_access(&user, now),
            trial_used: user.trial_used,
        })
    }
}
