//! In-memory account store for tests and single-process development.
//!
//! Implements the subscription, user-account and webhook-ledger ports over
//! one lock, so a record write and its cache write land together the same
//! way the Postgres adapter does it inside a transaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::domain::subscription::{
    AccessCacheUpdate, Subscription, SubscriptionSnapshot, UserAccount,
};
use crate::ports::{
    SaveResult, SubscriptionRepository, UserAccountRepository, WebhookEventRecord,
    WebhookEventRepository,
};

#[derive(Debug, Default)]
struct StoreState {
    users: HashMap<String, UserAccount>,
    /// Keyed by user id; one record per user.
    subscriptions: HashMap<String, SubscriptionSnapshot>,
    webhook_events: HashMap<String, WebhookEventRecord>,
}

/// In-memory implementation of the storage ports.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountStore {
    state: Arc<RwLock<StoreState>>,
    /// Create unknown users on first lookup instead of reporting them missing.
    auto_provision: bool,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that treats every user id as an existing free account.
    pub fn auto_provisioning() -> Self {
        Self {
            auto_provision: true,
            ..Self::default()
        }
    }

    pub async fn insert_user(&self, user: UserAccount) {
        self.state
            .write()
            .await
            .users
            .insert(user.id.as_str().to_string(), user);
    }

    pub async fn user(&self, user_id: &UserId) -> Option<UserAccount> {
        self.state.read().await.users.get(user_id.as_str()).cloned()
    }

    pub async fn webhook_event_count(&self) -> usize {
        self.state.read().await.webhook_events.len()
    }

    fn user_mut<'a>(
        &self,
        state: &'a mut StoreState,
        user_id: &UserId,
    ) -> Result<&'a mut UserAccount, DomainError> {
        if self.auto_provision {
            return Ok(state
                .users
                .entry(user_id.as_str().to_string())
                .or_insert_with(|| UserAccount::new(user_id.clone())));
        }
        state.users.get_mut(user_id.as_str()).ok_or_else(|| {
            DomainError::new(ErrorCode::UserNotFound, format!("User {} not found", user_id))
        })
    }

    fn apply_cache(user: &mut UserAccount, cache: AccessCacheUpdate) -> Result<(), DomainError> {
        if cache.claim_trial && user.trial_used {
            return Err(DomainError::new(
                ErrorCode::TrialAlreadyUsed,
                format!("User {} has already used their trial", user.id),
            ));
        }
        cache.apply_to(user);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryAccountStore {
    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        state
            .subscriptions
            .get(user_id.as_str())
            .cloned()
            .map(Subscription::restore)
            .transpose()
    }

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.read().await;
        state
            .subscriptions
            .values()
            .find(|s| s.gateway_subscription_id.as_deref() == Some(gateway_subscription_id))
            .cloned()
            .map(Subscription::restore)
            .transpose()
    }

    async fn insert(
        &self,
        subscription: &Subscription,
        cache: AccessCacheUpdate,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let key = subscription.user_id.as_str().to_string();

        if state.subscriptions.contains_key(&key) {
            return Err(DomainError::new(
                ErrorCode::SubscriptionExists,
                format!("User {} already has a subscription record", subscription.user_id),
            ));
        }

        let user = self.user_mut(&mut state, &subscription.user_id)?;
        let mut updated = user.clone();
        Self::apply_cache(&mut updated, cache)?;
        *user = updated;

        state.subscriptions.insert(key, subscription.snapshot());
        Ok(())
    }

    async fn update(
        &self,
        subscription: &Subscription,
        cache: AccessCacheUpdate,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let key = subscription.user_id.as_str();

        let stored_version = state
            .subscriptions
            .get(key)
            .map(|s| s.version)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("No subscription for user {}", subscription.user_id),
                )
            })?;
        if stored_version != subscription.version() {
            return Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!(
                    "Subscription {} changed (expected version {}, found {})",
                    subscription.id,
                    subscription.version(),
                    stored_version
                ),
            ));
        }

        let user = self.user_mut(&mut state, &subscription.user_id)?;
        let mut updated = user.clone();
        Self::apply_cache(&mut updated, cache)?;
        *user = updated;

        let mut snapshot = subscription.snapshot();
        snapshot.version = stored_version + 1;
        state.subscriptions.insert(key.to_string(), snapshot);
        Ok(())
    }
}

#[async_trait]
impl UserAccountRepository for InMemoryAccountStore {
    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError> {
        if self.auto_provision {
            let mut state = self.state.write().await;
            return Ok(Some(self.user_mut(&mut state, user_id)?.clone()));
        }
        Ok(self.state.read().await.users.get(user_id.as_str()).cloned())
    }

    async fn set_gateway_customer_id(
        &self,
        user_id: &UserId,
        customer_id: &str,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        let user = self.user_mut(&mut state, user_id)?;
        user.gateway_customer_id = Some(customer_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryAccountStore {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        Ok(self.state.read().await.webhook_events.get(event_id).cloned())
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let mut state = self.state.write().await;
        if state.webhook_events.contains_key(&record.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        state
            .webhook_events
            .insert(record.event_id.clone(), record);
        Ok(SaveResult::Inserted)
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut state = self.state.write().await;
        let before = state.webhook_events.len();
        state
            .webhook_events
            .retain(|_, record| !record.processed_at.is_before(&cutoff));
        Ok((before - state.webhook_events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::SubscriptionId;
    use crate::domain::subscription::{UserSubscriptionStatus, WebhookOutcome};
    use serde_json::json;

    fn user_id() -> UserId {
        UserId::new("user-1").unwrap()
    }

    async fn store_with_user() -> InMemoryAccountStore {
        let store = InMemoryAccountStore::new();
        store.insert_user(UserAccount::new(user_id())).await;
        store
    }

    fn trial(now: Timestamp) -> Subscription {
        Subscription::start_trial(SubscriptionId::new(), user_id(), 7, now)
    }

    #[tokio::test]
    async fn insert_writes_record_and_cache_together() {
        let store = store_with_user().await;
        let now = Timestamp::now();
        let record = trial(now);

        store.insert(&record, record.access_cache(true)).await.unwrap();

        let user = store.user(&user_id()).await.unwrap();
        assert!(user.trial_used);
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Trial);
        assert_eq!(user.premium_access_until, Some(now.add_days(7)));
        assert!(store.find_by_user_id(&user_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_insert_for_user_is_rejected() {
        let store = store_with_user().await;
        let record = trial(Timestamp::now());
        store.insert(&record, record.access_cache(false)).await.unwrap();

        let err = store
            .insert(&record, record.access_cache(false))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionExists);
    }

    #[tokio::test]
    async fn claiming_used_trial_leaves_everything_untouched() {
        let store = InMemoryAccountStore::new();
        let mut user = UserAccount::new(user_id());
        user.trial_used = true;
        store.insert_user(user).await;
        let record = trial(Timestamp::now());

        let err = store.insert(&record, record.access_cache(true)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::TrialAlreadyUsed);
        assert!(store.find_by_user_id(&user_id()).await.unwrap().is_none());
        let user = store.user(&user_id()).await.unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Free);
    }

    #[tokio::test]
    async fn unknown_user_is_reported() {
        let store = InMemoryAccountStore::new();
        let record = trial(Timestamp::now());

        let err = store.insert(&record, record.access_cache(true)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UserNotFound);
    }

    #[tokio::test]
    async fn auto_provisioning_creates_free_accounts() {
        let store = InMemoryAccountStore::auto_provisioning();

        let user = store.find_by_id(&user_id()).await.unwrap().unwrap();

        assert_eq!(user.subscription_status, UserSubscriptionStatus::Free);
        assert!(!user.trial_used);
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = store_with_user().await;
        let now = Timestamp::now();
        let record = trial(now);
        store.insert(&record, record.access_cache(true)).await.unwrap();

        let mut first = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        let mut second = first.clone();

        first.cancel(false, now).unwrap();
        store.update(&first, first.access_cache(false)).await.unwrap();

        second.cancel(false, now).unwrap();
        let err = store
            .update(&second, second.access_cache(false))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConcurrentModification);

        let reloaded = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(reloaded.version(), 1);
    }

    #[tokio::test]
    async fn ledger_save_is_first_writer_wins() {
        let store = InMemoryAccountStore::new();
        let record = WebhookEventRecord::new(
            "evt-1",
            "subscription.updated",
            WebhookOutcome::Applied,
            json!({}),
            Timestamp::now(),
        );

        assert_eq!(store.save(record.clone()).await.unwrap(), SaveResult::Inserted);
        assert_eq!(store.save(record).await.unwrap(), SaveResult::AlreadyExists);
        assert_eq!(store.webhook_event_count().await, 1);
    }

    #[tokio::test]
    async fn delete_before_prunes_old_ledger_rows() {
        let store = InMemoryAccountStore::new();
        let now = Timestamp::now();
        for (id, at) in [("old", now.minus_days(40)), ("new", now)] {
            store
                .save(WebhookEventRecord::new(id, "t", WebhookOutcome::Ignored, json!({}), at))
                .await
                .unwrap();
        }

        let removed = store.delete_before(now.minus_days(30)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.find_by_event_id("old").await.unwrap().is_none());
        assert!(store.find_by_event_id("new").await.unwrap().is_some());
    }
}
