//! CancelSubscriptionHandler - Command handler for cancelling a subscription.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{SubscriptionError, SubscriptionSummary};
use crate::ports::{PaymentGateway, SubscriptionRepository};

use super::map_write_error;

/// Command to cancel a subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
    /// Keep access until the paid period ends (the default) instead of
    /// revoking it now.
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub subscription: SubscriptionSummary,
    /// When premium access ends; `None` for an open-ended period.
    pub access_until: Option<Timestamp>,
}

/// Handler for cancelling subscriptions.
///
/// When the record renews through gateway-side billing, the renewal is
/// stopped first; a gateway failure leaves the record unchanged.
pub struct CancelSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CancelSubscriptionHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            gateway,
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, SubscriptionError> {
        let mut record = self
            .subscriptions
            .find_by_user_id(&cmd.user_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(cmd.user_id.clone()))?;

        let now = Timestamp::now();
        let before = *record.state();
        let access_until = record.cancel(cmd.cancel_at_period_end, now)?;

        if *record.state() == before {
            return Ok(CancelSubscriptionResult {
                subscription: record.summary(now),
                access_until,
            });
        }

        if before.plan_type().is_paid() {
            if let Some(billing_id) = record.gateway_subscription_id.clone() {
                let billing = self
                    .gateway
                    .cancel_billing_subscription(&billing_id)
                    .await
                    .map_err(|e| {
                        tracing::warn!(
                            user_id = %cmd.user_id,
                            gateway_subscription_id = %billing_id,
                            error = %e,
                            "Stopping gateway renewals failed"
                        );
                        SubscriptionError::infrastructure(format!(
                            "could not stop renewals: {}",
                            e
                        ))
                    })?;
                // updates raised before this cancel are stale from here on
                record.observe_gateway_version(billing.version);
            }
        }

        self.subscriptions
            .update(&record, record.access_cache(false))
            .await
            .map_err(|e| {
                map_write_error(e, &cmd.user_id, |_| {
                    SubscriptionError::infrastructure("subscription changed concurrently; retry")
                })
            })?;

        tracing::info!(
            user_id = %cmd.user_id,
            at_period_end = cmd.cancel_at_period_end,
            status = %record.status(),
            "Subscription cancelled"
        );

        Ok(CancelSubscriptionResult {
            subscription: record.summary(now),
            access_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAccountStore;
    use crate::adapters::square::MockPaymentGateway;
    use crate::domain::foundation::SubscriptionId;
    use crate::domain::subscription::{
        compute_access, ChargeLinkage, PlanCatalog, Subscription, SubscriptionStatus, UserAccount,
        UserSubscriptionStatus,
    };
    use crate::ports::PaymentError;

    // ════════════════════════════════════════════════════════════════════════════
    // Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn user_id() -> UserId {
        UserId::new("user-cancel").unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryAccountStore>,
        gateway: MockPaymentGateway,
        handler: CancelSubscriptionHandler,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(InMemoryAccountStore::new());
        store.insert_user(UserAccount::new(user_id())).await;
        let gateway = MockPaymentGateway::new();
        let handler = CancelSubscriptionHandler::new(store.clone(), Arc::new(gateway.clone()));
        Fixture {
            store,
            gateway,
            handler,
        }
    }

    /// Monthly subscription bought 20 days ago.
    async fn seed_paid(store: &InMemoryAccountStore, billing_id: Option<&str>) -> Subscription {
        let plan = PlanCatalog::default().resolve("monthly-plan").unwrap().clone();
        let record = Subscription::activate_paid(
            SubscriptionId::new(),
            user_id(),
            &plan,
            ChargeLinkage {
                payment_method_id: "card-1".to_string(),
                gateway_customer_id: "cust-1".to_string(),
                charge_id: "pay-1".to_string(),
                gateway_subscription_id: billing_id.map(str::to_string),
            },
            Timestamp::now().minus_days(20),
        );
        store.insert(&record, record.access_cache(false)).await.unwrap();
        record
    }

    fn cmd(at_period_end: bool) -> CancelSubscriptionCommand {
        CancelSubscriptionCommand {
            user_id: user_id(),
            cancel_at_period_end: at_period_end,
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn at_period_end_keeps_access_until_period_end() {
        let f = setup().await;
        let seeded = seed_paid(&f.store, None).await;
        let period_end = seeded.state().period_end();

        let result = f.handler.handle(cmd(true)).await.unwrap();

        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        assert!(result.subscription.cancel_at_period_end);
        assert_eq!(result.access_until, period_end);

        let user = f.store.user(&user_id()).await.unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::PremiumMonthly);
        assert!(compute_access(&user, Timestamp::now()).has_premium_access);
        let end = period_end.unwrap();
        assert!(!compute_access(&user, end).has_premium_access);
    }

    #[tokio::test]
    async fn immediate_cancel_revokes_access_on_next_read() {
        let f = setup().await;
        seed_paid(&f.store, None).await;

        let result = f.handler.handle(cmd(false)).await.unwrap();

        assert_eq!(result.subscription.status, SubscriptionStatus::Cancelled);
        let user = f.store.user(&user_id()).await.unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Cancelled);
        assert_eq!(user.premium_access_until, result.access_until);
        assert!(!compute_access(&user, Timestamp::now()).has_premium_access);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let f = setup().await;

        let err = f.handler.handle(cmd(true)).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn linked_billing_is_stopped_at_the_gateway() {
        let f = setup().await;
        seed_paid(&f.store, Some("sq-sub-1")).await;

        f.handler.handle(cmd(true)).await.unwrap();

        assert_eq!(f.gateway.call_count("cancel_billing_subscription"), 1);
    }

    #[tokio::test]
    async fn cancel_response_version_is_recorded() {
        let f = setup().await;
        seed_paid(&f.store, Some("sq-sub-1")).await;

        f.handler.handle(cmd(false)).await.unwrap();

        let record = f.store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.gateway_version, Some(2));
        assert!(record.is_stale(Some(1)));
    }

    #[tokio::test]
    async fn gateway_failure_leaves_record_unchanged() {
        let f = setup().await;
        seed_paid(&f.store, Some("sq-sub-1")).await;
        f.gateway.set_method_error(
            "cancel_billing_subscription",
            PaymentError::network("connection reset"),
        );

        let err = f.handler.handle(cmd(false)).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::Infrastructure(_)));
        let record = f.store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn repeating_at_period_end_cancel_is_a_no_op() {
        let f = setup().await;
        seed_paid(&f.store, Some("sq-sub-1")).await;

        f.handler.handle(cmd(true)).await.unwrap();
        f.handler.handle(cmd(true)).await.unwrap();

        assert_eq!(f.gateway.call_count("cancel_billing_subscription"), 1);
        let record = f.store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.version(), 1);
    }

    #[tokio::test]
    async fn trial_cancel_at_period_end_leaves_trial_running() {
        let f = setup().await;
        let trial = Subscription::start_trial(SubscriptionId::new(), user_id(), 7, Timestamp::now());
        f.store.insert(&trial, trial.access_cache(true)).await.unwrap();

        let result = f.handler.handle(cmd(true)).await.unwrap();

        assert!(result.subscription.is_trial_active);
        assert_eq!(result.access_until, trial.trial.map(|t| t.end));
    }
}
