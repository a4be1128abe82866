//! Mock payment gateway for testing and local development.
//!
//! Keeps customers, cards and billing subscriptions in memory. Supports
//! error injection per method and records every call so tests can assert
//! on what reached the gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::ports::{
    BillingSubscription, BillingSubscriptionRequest, ChargeReceipt, ChargeRequest, ChargeStatus,
    CreateCustomerRequest, GatewayCustomer, PaymentError, PaymentGateway, StoreCardRequest,
    StoredCard,
};

/// Mock payment gateway.
///
/// ```ignore
/// let gateway = MockPaymentGateway::new();
/// gateway.set_method_error("charge", PaymentError::card_declined("Test decline"));
/// ```
#[derive(Default, Clone)]
pub struct MockPaymentGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    customers: HashMap<String, GatewayCustomer>,
    cards: HashMap<String, StoredCard>,
    billing: HashMap<String, BillingSubscription>,

    /// Status the next charges report. Defaults to `Completed`.
    charge_status: Option<ChargeStatus>,

    /// Error to return on the next call to any method (consumed).
    next_error: Option<PaymentError>,

    /// Sticky errors by method name.
    method_errors: HashMap<String, PaymentError>,

    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    pub fn set_error(&self, error: PaymentError) {
        self.state().next_error = Some(error);
    }

    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.method_errors.clear();
    }

    /// Makes subsequent charges report `status` instead of `Completed`.
    pub fn set_charge_status(&self, status: ChargeStatus) {
        self.state().charge_status = Some(status);
    }

    pub fn add_card(&self, card: StoredCard) {
        self.state().cards.insert(card.id.clone(), card);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Idempotency keys sent with `charge`, in call order.
    pub fn charge_keys(&self) -> Vec<String> {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == "charge")
            .filter_map(|c| c.args.get(2).cloned())
            .collect()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self, method: &str, args: Vec<String>) {
        self.state().call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
    }

    fn check_error(&self, method: &str) -> Result<(), PaymentError> {
        let mut state = self.state();

        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }

        if let Some(error) = state.next_error.take() {
            return Err(error);
        }

        Ok(())
    }

    fn mock_id(prefix: &str) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}_mock_{}", prefix, &id[..12])
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<GatewayCustomer, PaymentError> {
        self.record_call(
            "create_customer",
            vec![request.user_id.to_string(), request.idempotency_key.clone()],
        );
        self.check_error("create_customer")?;

        let customer = GatewayCustomer {
            id: Self::mock_id("cust"),
        };
        self.state()
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        self.record_call(
            "charge",
            vec![
                request.customer_id.clone(),
                request.payment_method_id.clone(),
                request.idempotency_key.clone(),
                request.amount.amount_minor_units.to_string(),
            ],
        );
        self.check_error("charge")?;

        let status = self.state().charge_status.unwrap_or(ChargeStatus::Completed);
        Ok(ChargeReceipt {
            charge_id: Self::mock_id("pay"),
            status,
            amount: request.amount,
        })
    }

    async fn list_stored_cards(&self, customer_id: &str) -> Result<Vec<StoredCard>, PaymentError> {
        self.record_call("list_stored_cards", vec![customer_id.to_string()]);
        self.check_error("list_stored_cards")?;

        let mut cards: Vec<StoredCard> = self
            .state()
            .cards
            .values()
            .filter(|c| c.customer_id.as_deref() == Some(customer_id))
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(cards)
    }

    async fn create_stored_card(
        &self,
        request: StoreCardRequest,
    ) -> Result<StoredCard, PaymentError> {
        self.record_call(
            "create_stored_card",
            vec![request.customer_id.clone(), request.source_id.clone()],
        );
        self.check_error("create_stored_card")?;

        let card = StoredCard {
            id: Self::mock_id("ccof"),
            customer_id: Some(request.customer_id),
            last4: "1111".to_string(),
            brand: "VISA".to_string(),
            exp_month: 12,
            exp_year: 2030,
            enabled: true,
        };
        self.add_card(card.clone());
        Ok(card)
    }

    async fn disable_stored_card(&self, card_id: &str) -> Result<StoredCard, PaymentError> {
        self.record_call("disable_stored_card", vec![card_id.to_string()]);
        self.check_error("disable_stored_card")?;

        let mut state = self.state();
        let card = state
            .cards
            .get_mut(card_id)
            .ok_or_else(|| PaymentError::not_found("Card"))?;
        card.enabled = false;
        Ok(card.clone())
    }

    async fn create_billing_subscription(
        &self,
        request: BillingSubscriptionRequest,
    ) -> Result<BillingSubscription, PaymentError> {
        self.record_call(
            "create_billing_subscription",
            vec![request.customer_id.clone(), request.gateway_plan_id.clone()],
        );
        self.check_error("create_billing_subscription")?;

        let subscription = BillingSubscription {
            id: Self::mock_id("sub"),
            status: "ACTIVE".to_string(),
            version: Some(1),
        };
        self.state()
            .billing
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn cancel_billing_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, PaymentError> {
        self.record_call("cancel_billing_subscription", vec![subscription_id.to_string()]);
        self.check_error("cancel_billing_subscription")?;

        let mut state = self.state();
        let subscription = state
            .billing
            .entry(subscription_id.to_string())
            .or_insert_with(|| BillingSubscription {
                id: subscription_id.to_string(),
                status: "ACTIVE".to_string(),
                version: Some(1),
            });
        subscription.status = "CANCELED".to_string();
        subscription.version = subscription.version.map(|v| v + 1);
        Ok(subscription.clone())
    }
}
