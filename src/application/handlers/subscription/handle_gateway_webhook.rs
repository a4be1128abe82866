//! HandleGatewayWebhookHandler - Command handler for payment gateway webhooks.
//!
//! Deliveries are at-least-once and may arrive out of order. Every event id
//! is written to a ledger exactly once; a redelivery is acknowledged without
//! being applied again. Failures while applying an event to a tracked record
//! never fail the delivery: they are logged, marked on the record's webhook
//! log and recorded in the ledger as `failed` for manual reconciliation.

use std::sync::Arc;

use crate::domain::foundation::{ErrorCode, Timestamp};
use crate::domain::subscription::{
    GatewayEvent, GatewayEventType, Subscription, SubscriptionError, WebhookLogEntry,
    WebhookOutcome,
};
use crate::ports::{
    SaveResult, SubscriptionRepository, WebhookEventRecord, WebhookEventRepository,
    WebhookSignatureVerifier,
};

/// Attempts at writing a record before giving up on version conflicts.
pub const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// Command to handle a webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleGatewayWebhookCommand {
    /// Raw request body, exactly as signed.
    pub payload: Vec<u8>,
    /// Signature header value, if present.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandleGatewayWebhookResult {
    pub event_id: String,
    pub event_type: String,
    pub outcome: WebhookOutcome,
    /// The event id was already in the ledger; nothing was applied.
    pub duplicate: bool,
}

/// What applying an event did, before it is written to the ledger.
struct Applied {
    outcome: WebhookOutcome,
    reason: Option<String>,
}

impl Applied {
    fn outcome(outcome: WebhookOutcome) -> Self {
        Self {
            outcome,
            reason: None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            outcome: WebhookOutcome::Ignored,
            reason: Some(reason.into()),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: WebhookOutcome::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// Handler for gateway webhooks.
pub struct HandleGatewayWebhookHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    ledger: Arc<dyn WebhookEventRepository>,
    verifier: Option<Arc<dyn WebhookSignatureVerifier>>,
}

impl HandleGatewayWebhookHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        ledger: Arc<dyn WebhookEventRepository>,
    ) -> Self {
        Self {
            subscriptions,
            ledger,
            verifier: None,
        }
    }

    /// Requires every delivery to pass `verifier`.
    pub fn with_verifier(mut self, verifier: Arc<dyn WebhookSignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub async fn handle(
        &self,
        cmd: HandleGatewayWebhookCommand,
    ) -> Result<HandleGatewayWebhookResult, SubscriptionError> {
        // 1. Authenticity
        if let Some(verifier) = &self.verifier {
            verifier
                .verify(&cmd.payload, cmd.signature.as_deref())
                .map_err(|e| {
                    tracing::warn!(error = %e, "Webhook signature rejected");
                    SubscriptionError::InvalidWebhookSignature
                })?;
        }

        // 2. Parse
        let event = GatewayEvent::parse(&cmd.payload)?;

        // 3. Ledger lookup
        if let Some(previous) = self.ledger.find_by_event_id(&event.event_id).await? {
            tracing::debug!(event_id = %event.event_id, "Duplicate webhook delivery");
            return Ok(HandleGatewayWebhookResult {
                event_id: event.event_id,
                event_type: event.raw_type,
                outcome: previous.outcome,
                duplicate: true,
            });
        }

        // 4. Apply
        let now = Timestamp::now();
        let applied = self.apply(&event, now).await;
        match applied.outcome {
            WebhookOutcome::Failed => tracing::error!(
                event_id = %event.event_id,
                event_type = %event.raw_type,
                reason = applied.reason.as_deref().unwrap_or_default(),
                "Webhook could not be applied; needs reconciliation"
            ),
            outcome => tracing::info!(
                event_id = %event.event_id,
                event_type = %event.raw_type,
                outcome = %outcome,
                reason = applied.reason.as_deref().unwrap_or_default(),
                "Webhook processed"
            ),
        }

        // 5. Ledger write; only a failure here makes the gateway redeliver
        let mut record = WebhookEventRecord::new(
            event.event_id.clone(),
            event.raw_type.clone(),
            applied.outcome,
            event.data.clone(),
            now,
        );
        if let Some(reason) = applied.reason {
            record = record.with_reason(reason);
        }
        let saved = self.ledger.save(record).await.map_err(|e| {
            tracing::error!(event_id = %event.event_id, error = %e, "Webhook ledger write failed");
            SubscriptionError::infrastructure(format!("webhook ledger: {}", e))
        })?;

        Ok(HandleGatewayWebhookResult {
            event_id: event.event_id,
            event_type: event.raw_type,
            outcome: applied.outcome,
            duplicate: saved == SaveResult::AlreadyExists,
        })
    }

    async fn apply(&self, event: &GatewayEvent, now: Timestamp) -> Applied {
        match event.event_type {
            GatewayEventType::SubscriptionCreated | GatewayEventType::SubscriptionUpdated => {
                let update = match event.subscription() {
                    Ok(update) => update,
                    Err(e) => return Applied::failed(e.to_string()),
                };
                self.apply_to_tracked(event, &update.id, now, |record| {
                    record.apply_gateway_update(&update, event.created_at, now)
                })
                .await
            }
            GatewayEventType::SubscriptionCanceled => {
                let update = match event.subscription() {
                    Ok(update) => update,
                    Err(e) => return Applied::failed(e.to_string()),
                };
                self.apply_to_tracked(event, &update.id, now, |record| {
                    record.mark_cancelled_by_gateway(update.version, now)
                })
                .await
            }
            GatewayEventType::InvoicePaymentMade | GatewayEventType::InvoicePaymentFailed => {
                let invoice = match event.invoice() {
                    Ok(invoice) => invoice,
                    Err(e) => return Applied::failed(e.to_string()),
                };
                match invoice.subscription_id {
                    Some(subscription_id) => {
                        self.apply_to_tracked(event, &subscription_id, now, |_| {
                            Ok(WebhookOutcome::Recorded)
                        })
                        .await
                    }
                    None => Applied::ignored("invoice without subscription"),
                }
            }
            GatewayEventType::Unknown => Applied::ignored("unhandled event type"),
        }
    }

    /// Applies `mutate` to the record linked to `gateway_subscription_id`,
    /// appending the event to its log in the same write. Re-reads and
    /// retries on version conflicts.
    async fn apply_to_tracked<F>(
        &self,
        event: &GatewayEvent,
        gateway_subscription_id: &str,
        now: Timestamp,
        mutate: F,
    ) -> Applied
    where
        F: Fn(&mut Subscription) -> Result<WebhookOutcome, SubscriptionError> + Send + Sync,
    {
        let mut record = match self
            .subscriptions
            .find_by_gateway_subscription_id(gateway_subscription_id)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return Applied::ignored("untracked subscription"),
            Err(e) => return Applied::failed(e.to_string()),
        };

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            if record.has_processed_event(&event.event_id) {
                return Applied::ignored("already on the subscription log");
            }

            let mut updated = record.clone();
            let outcome = match mutate(&mut updated) {
                Ok(outcome) => outcome,
                Err(e) => return self.mark_failed(record, event, e.to_string(), now).await,
            };
            updated.record_webhook(WebhookLogEntry::new(
                event.raw_type.clone(),
                event.event_id.clone(),
                event.data.clone(),
                outcome,
                now,
            ));

            match self
                .subscriptions
                .update(&updated, updated.access_cache(false))
                .await
            {
                Ok(()) => return Applied::outcome(outcome),
                Err(e) if e.code == ErrorCode::ConcurrentModification => {
                    tracing::debug!(
                        event_id = %event.event_id,
                        attempt,
                        "Subscription changed during webhook; retrying"
                    );
                    record = match self.subscriptions.find_by_user_id(&record.user_id).await {
                        Ok(Some(fresh)) => fresh,
                        Ok(None) => return Applied::failed("subscription disappeared"),
                        Err(e) => return Applied::failed(e.to_string()),
                    };
                }
                Err(e) => return self.mark_failed(record, event, e.to_string(), now).await,
            }
        }

        self.mark_failed(
            record,
            event,
            format!(
                "gave up after {} concurrent modifications",
                MAX_UPDATE_ATTEMPTS
            ),
            now,
        )
        .await
    }

    /// Puts an error marker on the record's log. The ledger entry carries
    /// the failure even if this write is lost.
    async fn mark_failed(
        &self,
        mut record: Subscription,
        event: &GatewayEvent,
        reason: String,
        now: Timestamp,
    ) -> Applied {
        record.record_webhook(WebhookLogEntry::failed(
            event.raw_type.clone(),
            event.event_id.clone(),
            event.data.clone(),
            reason.clone(),
            now,
        ));
        if let Err(e) = self
            .subscriptions
            .update(&record, record.access_cache(false))
            .await
        {
            tracing::error!(
                event_id = %event.event_id,
                subscription_id = %record.id,
                error = %e,
                "Could not mark webhook failure on subscription"
            );
        }
        Applied::failed(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAccountStore;
    use crate::domain::foundation::{DomainError, SubscriptionId, UserId};
    use crate::domain::subscription::{
        compute_access, ChargeLinkage, PlanCatalog, SubscriptionStatus, UserAccount,
        UserSubscriptionStatus,
    };
    use crate::domain::subscription::AccessCacheUpdate;
    use crate::ports::PaymentError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ════════════════════════════════════════════════════════════════════════════
    // Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn user_id() -> UserId {
        UserId::new("user-hook").unwrap()
    }

    async fn setup() -> (Arc<InMemoryAccountStore>, HandleGatewayWebhookHandler) {
        let store = Arc::new(InMemoryAccountStore::new());
        store.insert_user(UserAccount::new(user_id())).await;
        let handler = HandleGatewayWebhookHandler::new(store.clone(), store.clone());
        (store, handler)
    }

    async fn seed_paid(store: &InMemoryAccountStore) -> Subscription {
        let plan = PlanCatalog::default().resolve("monthly-plan").unwrap().clone();
        let record = Subscription::activate_paid(
            SubscriptionId::new(),
            user_id(),
            &plan,
            ChargeLinkage {
                payment_method_id: "card-1".to_string(),
                gateway_customer_id: "cust-1".to_string(),
                charge_id: "pay-1".to_string(),
                gateway_subscription_id: Some("sq-sub-1".to_string()),
            },
            Timestamp::now().minus_days(3),
        );
        store.insert(&record, record.access_cache(false)).await.unwrap();
        record
    }

    fn subscription_event(
        event_id: &str,
        event_type: &str,
        status: &str,
        version: i64,
        through: &str,
    ) -> HandleGatewayWebhookCommand {
        let body = json!({
            "event_id": event_id,
            "type": event_type,
            "data": {
                "type": "subscription",
                "id": "sq-sub-1",
                "object": {
                    "subscription": {
                        "id": "sq-sub-1",
                        "status": status,
                        "charged_through_date": through,
                        "version": version
                    }
                }
            }
        });
        HandleGatewayWebhookCommand {
            payload: serde_json::to_vec(&body).unwrap(),
            signature: None,
        }
    }

    /// Stamps the delivery with the gateway's creation time.
    fn raised_at(mut cmd: HandleGatewayWebhookCommand, at: Timestamp) -> HandleGatewayWebhookCommand {
        let mut body: serde_json::Value = serde_json::from_slice(&cmd.payload).unwrap();
        body["created_at"] = json!(at.as_datetime().to_rfc3339());
        cmd.payload = serde_json::to_vec(&body).unwrap();
        cmd
    }

    /// Cancels the seeded record immediately, as the cancel endpoint does
    /// after the gateway answered at `gateway_version`.
    async fn cancel_now(store: &InMemoryAccountStore, gateway_version: Option<i64>) -> Timestamp {
        let mut record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        let now = Timestamp::now();
        record.cancel(false, now).unwrap();
        record.observe_gateway_version(gateway_version);
        store.update(&record, record.access_cache(false)).await.unwrap();
        now
    }

    fn future_date(days: i64) -> String {
        Timestamp::now()
            .add_days(days)
            .as_datetime()
            .format("%Y-%m-%d")
            .to_string()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscription events
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn update_recomputes_period_and_cache() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        let through = future_date(40);

        let result = handler
            .handle(subscription_event("evt-1", "subscription.updated", "ACTIVE", 2, &through))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Applied);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        let end = record.state().period_end().unwrap();
        assert_eq!(end.as_datetime().format("%Y-%m-%d").to_string(), through);
        assert_eq!(record.state().period_start(), Some(end.minus_months(1)));
        assert_eq!(record.webhook_events().len(), 1);

        let user = store.user(&user_id()).await.unwrap();
        assert_eq!(user.premium_access_until, Some(end));
    }

    #[tokio::test]
    async fn redelivery_is_not_applied_twice() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        let event = subscription_event("evt-1", "subscription.updated", "ACTIVE", 2, &future_date(40));

        handler.handle(event.clone()).await.unwrap();
        let once = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        let second = handler.handle(event).await.unwrap();
        let twice = store.find_by_user_id(&user_id()).await.unwrap().unwrap();

        assert!(second.duplicate);
        assert_eq!(once, twice);
        assert_eq!(store.webhook_event_count().await, 1);
    }

    #[tokio::test]
    async fn older_version_is_stale_and_not_applied() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        handler
            .handle(subscription_event("evt-new", "subscription.updated", "ACTIVE", 5, &future_date(40)))
            .await
            .unwrap();

        let result = handler
            .handle(subscription_event("evt-old", "subscription.updated", "PAST_DUE", 4, &future_date(10)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Stale);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Active);
        assert_eq!(record.gateway_version, Some(5));
        assert_eq!(record.webhook_events().len(), 2);
    }

    #[tokio::test]
    async fn active_update_older_than_our_cancel_stays_cancelled() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        cancel_now(&store, Some(2)).await;

        let result = handler
            .handle(subscription_event("evt-late", "subscription.updated", "ACTIVE", 1, &future_date(27)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Stale);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Cancelled);
        let user = store.user(&user_id()).await.unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Cancelled);
        assert!(!compute_access(&user, Timestamp::now()).has_premium_access);
    }

    #[tokio::test]
    async fn unversioned_update_raised_before_cancel_stays_cancelled() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        let cancelled_at = cancel_now(&store, None).await;

        let result = handler
            .handle(raised_at(
                subscription_event("evt-late", "subscription.updated", "ACTIVE", 1, &future_date(27)),
                cancelled_at.minus_days(1),
            ))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Stale);
        let user = store.user(&user_id()).await.unwrap();
        assert!(!compute_access(&user, Timestamp::now()).has_premium_access);
    }

    #[tokio::test]
    async fn canceled_after_past_due_grants_no_access() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        handler
            .handle(subscription_event("evt-pd", "subscription.updated", "PAST_DUE", 2, &future_date(27)))
            .await
            .unwrap();

        let result = handler
            .handle(subscription_event("evt-c", "subscription.canceled", "CANCELED", 3, &future_date(27)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Applied);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Cancelled);
        let user = store.user(&user_id()).await.unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Cancelled);
        assert!(!compute_access(&user, Timestamp::now()).has_premium_access);
    }

    #[tokio::test]
    async fn canceled_keeps_access_until_period_end() {
        let (store, handler) = setup().await;
        let seeded = seed_paid(&store).await;
        let before = store.user(&user_id()).await.unwrap();

        let result = handler
            .handle(subscription_event("evt-c", "subscription.canceled", "CANCELED", 3, &future_date(27)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Applied);
        let user = store.user(&user_id()).await.unwrap();
        assert_eq!(user.subscription_status, UserSubscriptionStatus::Cancelled);
        assert_eq!(user.premium_access_until, before.premium_access_until);
        assert_eq!(user.premium_access_until, seeded.state().period_end());
        assert!(compute_access(&user, Timestamp::now()).has_premium_access);
    }

    #[tokio::test]
    async fn untracked_subscription_is_ignored_but_recorded() {
        let (store, handler) = setup().await;

        let result = handler
            .handle(subscription_event("evt-x", "subscription.canceled", "CANCELED", 1, "2030-01-01"))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Ignored);
        let ledger = store.find_by_event_id("evt-x").await.unwrap().unwrap();
        assert_eq!(ledger.error_message.as_deref(), Some("untracked subscription"));
    }

    #[tokio::test]
    async fn unknown_status_is_marked_failed_on_record_and_ledger() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;

        let result = handler
            .handle(subscription_event("evt-f", "subscription.updated", "EXPLODED", 2, &future_date(30)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Failed);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Active);
        let entry = &record.webhook_events()[0];
        assert_eq!(entry.outcome, WebhookOutcome::Failed);
        assert!(entry.error.is_some());
        let ledger = store.find_by_event_id("evt-f").await.unwrap().unwrap();
        assert_eq!(ledger.outcome, WebhookOutcome::Failed);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Other event types
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn invoice_events_are_logged_for_audit() {
        let (store, handler) = setup().await;
        seed_paid(&store).await;
        let body = json!({
            "event_id": "evt-inv",
            "type": "invoice.payment_made",
            "data": {"object": {"invoice": {"id": "inv-1", "subscription_id": "sq-sub-1", "status": "PAID"}}}
        });

        let result = handler
            .handle(HandleGatewayWebhookCommand {
                payload: serde_json::to_vec(&body).unwrap(),
                signature: None,
            })
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Recorded);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Active);
        assert!(record.has_processed_event("evt-inv"));
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let (_store, handler) = setup().await;
        let body = json!({"event_id": "evt-u", "type": "catalog.version.updated", "data": {}});

        let result = handler
            .handle(HandleGatewayWebhookCommand {
                payload: serde_json::to_vec(&body).unwrap(),
                signature: None,
            })
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Ignored);
        assert!(!result.duplicate);
    }

    #[tokio::test]
    async fn unparseable_body_is_invalid_input() {
        let (_store, handler) = setup().await;

        let err = handler
            .handle(HandleGatewayWebhookCommand {
                payload: b"not json".to_vec(),
                signature: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidInput { .. }));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Signatures
    // ════════════════════════════════════════════════════════════════════════════

    struct FixedVerifier {
        accept: bool,
    }

    impl WebhookSignatureVerifier for FixedVerifier {
        fn verify(&self, _payload: &[u8], _signature: Option<&str>) -> Result<(), PaymentError> {
            if self.accept {
                Ok(())
            } else {
                Err(PaymentError::new(
                    crate::ports::PaymentErrorCode::AuthenticationError,
                    "bad signature",
                ))
            }
        }
    }

    #[tokio::test]
    async fn rejected_signature_records_nothing() {
        let (store, handler) = setup().await;
        let handler = handler.with_verifier(Arc::new(FixedVerifier { accept: false }));

        let err = handler
            .handle(subscription_event("evt-1", "subscription.updated", "ACTIVE", 1, "2030-01-01"))
            .await
            .unwrap_err();

        assert_eq!(err, SubscriptionError::InvalidWebhookSignature);
        assert_eq!(store.webhook_event_count().await, 0);
    }

    #[tokio::test]
    async fn accepted_signature_processes() {
        let (_store, handler) = setup().await;
        let handler = handler.with_verifier(Arc::new(FixedVerifier { accept: true }));

        let result = handler
            .handle(subscription_event("evt-1", "subscription.updated", "ACTIVE", 1, "2030-01-01"))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Ignored);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Version conflicts and ledger failures
    // ════════════════════════════════════════════════════════════════════════════

    /// Wraps the in-memory store and fails the first `conflicts` updates.
    struct ConflictingRepository {
        inner: Arc<InMemoryAccountStore>,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl SubscriptionRepository for ConflictingRepository {
        async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<Subscription>, DomainError> {
            self.inner.find_by_user_id(user_id).await
        }

        async fn find_by_gateway_subscription_id(
            &self,
            id: &str,
        ) -> Result<Option<Subscription>, DomainError> {
            self.inner.find_by_gateway_subscription_id(id).await
        }

        async fn insert(&self, s: &Subscription, c: AccessCacheUpdate) -> Result<(), DomainError> {
            self.inner.insert(s, c).await
        }

        async fn update(&self, s: &Subscription, c: AccessCacheUpdate) -> Result<(), DomainError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Err(DomainError::new(ErrorCode::ConcurrentModification, "conflict"));
            }
            self.inner.update(s, c).await
        }
    }

    #[tokio::test]
    async fn version_conflicts_are_retried() {
        let store = Arc::new(InMemoryAccountStore::new());
        store.insert_user(UserAccount::new(user_id())).await;
        seed_paid(&store).await;
        let repo = Arc::new(ConflictingRepository {
            inner: store.clone(),
            conflicts: AtomicU32::new(MAX_UPDATE_ATTEMPTS - 1),
        });
        let handler = HandleGatewayWebhookHandler::new(repo, store.clone());

        let result = handler
            .handle(subscription_event("evt-r", "subscription.updated", "PAST_DUE", 2, &future_date(5)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Applied);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_without_losing_the_event() {
        let store = Arc::new(InMemoryAccountStore::new());
        store.insert_user(UserAccount::new(user_id())).await;
        seed_paid(&store).await;
        let repo = Arc::new(ConflictingRepository {
            inner: store.clone(),
            conflicts: AtomicU32::new(MAX_UPDATE_ATTEMPTS),
        });
        let handler = HandleGatewayWebhookHandler::new(repo, store.clone());

        let result = handler
            .handle(subscription_event("evt-r", "subscription.updated", "PAST_DUE", 2, &future_date(5)))
            .await
            .unwrap();

        assert_eq!(result.outcome, WebhookOutcome::Failed);
        let ledger = store.find_by_event_id("evt-r").await.unwrap().unwrap();
        assert_eq!(ledger.outcome, WebhookOutcome::Failed);
        let record = store.find_by_user_id(&user_id()).await.unwrap().unwrap();
        assert_eq!(record.status(), SubscriptionStatus::Active);
        assert_eq!(record.webhook_events()[0].outcome, WebhookOutcome::Failed);
    }

    struct FailingLedger;

    #[async_trait]
    impl WebhookEventRepository for FailingLedger {
        async fn find_by_event_id(&self, _id: &str) -> Result<Option<WebhookEventRecord>, DomainError> {
            Ok(None)
        }

        async fn save(&self, _record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
            Err(DomainError::database("ledger unavailable"))
        }

        async fn delete_before(&self, _cutoff: Timestamp) -> Result<u64, DomainError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn ledger_failure_is_an_error_so_the_gateway_retries() {
        let (store, _) = setup().await;
        let handler = HandleGatewayWebhookHandler::new(store, Arc::new(FailingLedger));

        let err = handler
            .handle(subscription_event("evt-1", "subscription.updated", "ACTIVE", 1, "2030-01-01"))
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Infrastructure(_)));
    }
}
