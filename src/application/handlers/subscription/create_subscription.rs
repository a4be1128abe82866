//! CreateSubscriptionHandler - Command handler for purchasing a plan.

use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{
    ChargeLinkage, PlanCatalog, PlanDescriptor, Subscription, SubscriptionError,
    SubscriptionSummary, UserAccount, WebhookOutcome,
};
use crate::ports::{
    BillingSubscription, BillingSubscriptionRequest, ChargeReceipt, ChargeRequest,
    CreateCustomerRequest, Money, PaymentGateway, SubscriptionRepository, UserAccountRepository,
    WebhookEventRecord, WebhookEventRepository,
};

use super::{load_user, map_write_error};

/// Ledger event type for a completed charge whose record write failed.
pub const UNRECORDED_CHARGE_EVENT: &str = "charge.unrecorded";

/// Command to purchase a plan.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub user_id: UserId,
    pub plan_id: String,
    /// Card on file or single-use card token.
    pub payment_method_id: String,
    /// Client-chosen key that makes a retried purchase safe to resend.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionResult {
    pub subscription: SubscriptionSummary,
    pub receipt: ChargeReceipt,
}

/// Handler for purchasing a plan.
///
/// The charge must complete before the record is touched. A declined or
/// failed charge leaves the record and the user cache exactly as they were.
pub struct CreateSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    users: Arc<dyn UserAccountRepository>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<PlanCatalog>,
    reconciliation: Option<Arc<dyn WebhookEventRepository>>,
}

impl CreateSubscriptionHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        users: Arc<dyn UserAccountRepository>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            subscriptions,
            users,
            gateway,
            catalog,
            reconciliation: None,
        }
    }

    /// Charges that succeed but cannot be recorded leave a `failed` entry
    /// on `ledger`.
    pub fn with_reconciliation_ledger(mut self, ledger: Arc<dyn WebhookEventRepository>) -> Self {
        self.reconciliation = Some(ledger);
        self
    }

    pub async fn handle(
        &self,
        cmd: CreateSubscriptionCommand,
    ) -> Result<CreateSubscriptionResult, SubscriptionError> {
        // 1. Validate input and resolve the plan
        if cmd.payment_method_id.trim().is_empty() {
            return Err(SubscriptionError::invalid_input(
                "payment_method_id",
                "cannot be empty",
            ));
        }
        let plan = self
            .catalog
            .resolve(&cmd.plan_id)
            .cloned()
            .ok_or_else(|| SubscriptionError::invalid_plan(&cmd.plan_id))?;

        // 2. Preconditions, before any gateway call
        let user = load_user(self.users.as_ref(), &cmd.user_id).await?;
        let existing = self.subscriptions.find_by_user_id(&cmd.user_id).await?;
        if existing.as_ref().map_or(false, |s| s.state().holds_paid_plan()) {
            return Err(SubscriptionError::duplicate_subscription(cmd.user_id));
        }

        // 3. Gateway customer, reused when we already have one
        let customer_id = self.ensure_customer(&user, existing.as_ref()).await?;

        // 4. Charge
        let idempotency_key = charge_idempotency_key(
            &cmd.user_id,
            &plan.id,
            plan.amount_minor_units,
            cmd.idempotency_key.as_deref(),
        );
        let receipt = self
            .charge(&plan, &cmd, &customer_id, &idempotency_key)
            .await?;

        // 5. Recurring billing, best effort
        let now = Timestamp::now();
        let billing = self
            .enrol_recurring_billing(&plan, &cmd, &customer_id, &idempotency_key, now)
            .await;

        // 6. Record the purchase together with the user cache
        let linkage = ChargeLinkage {
            payment_method_id: cmd.payment_method_id.clone(),
            gateway_customer_id: customer_id.clone(),
            charge_id: receipt.charge_id.clone(),
            gateway_subscription_id: billing.as_ref().map(|b| b.id.clone()),
        };
        let billing_version = billing.and_then(|b| b.version);
        let written = match existing {
            Some(mut record) => {
                record.renew_paid(&plan, linkage, now)?;
                record.observe_gateway_version(billing_version);
                self.subscriptions
                    .update(&record, record.access_cache(false))
                    .await
                    .map(|()| record)
            }
            None => {
                let mut record = Subscription::activate_paid(
                    SubscriptionId::new(),
                    cmd.user_id.clone(),
                    &plan,
                    linkage,
                    now,
                );
                record.observe_gateway_version(billing_version);
                self.subscriptions
                    .insert(&record, record.access_cache(false))
                    .await
                    .map(|()| record)
            }
        };
        let record = match written {
            Ok(record) => record,
            Err(e) => {
                return Err(self
                    .unrecorded_charge(e, &cmd, &plan, &receipt, &idempotency_key)
                    .await)
            }
        };

        tracing::info!(
            user_id = %cmd.user_id,
            plan_id = %plan.id,
            charge_id = %receipt.charge_id,
            amount = receipt.amount.amount_minor_units,
            "Subscription purchased"
        );

        Ok(CreateSubscriptionResult {
            subscription: record.summary(now),
            receipt,
        })
    }

    async fn ensure_customer(
        &self,
        user: &UserAccount,
        existing: Option<&Subscription>,
    ) -> Result<String, SubscriptionError> {
        let known = user
            .gateway_customer_id
            .clone()
            .or_else(|| existing.and_then(|s| s.gateway_customer_id.clone()));
        if let Some(customer_id) = known {
            return Ok(customer_id);
        }

        let customer = self
            .gateway
            .create_customer(CreateCustomerRequest {
                user_id: user.id.clone(),
                email: user.email.clone(),
                idempotency_key: format!("customer-{}", user.id),
            })
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %user.id, error = %e, "Gateway customer creation failed");
                SubscriptionError::payment_failed(e.to_string())
            })?;

        self.users
            .set_gateway_customer_id(&user.id, &customer.id)
            .await?;
        Ok(customer.id)
    }

    async fn charge(
        &self,
        plan: &PlanDescriptor,
        cmd: &CreateSubscriptionCommand,
        customer_id: &str,
        idempotency_key: &str,
    ) -> Result<ChargeReceipt, SubscriptionError> {
        let request = ChargeRequest {
            amount: Money::new(plan.amount_minor_units, plan.currency.clone()),
            payment_method_id: cmd.payment_method_id.clone(),
            customer_id: customer_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            note: Some(format!("{} subscription", plan.name)),
        };

        let receipt = self.gateway.charge(request).await.map_err(|e| {
            tracing::warn!(
                user_id = %cmd.user_id,
                customer_id,
                idempotency_key,
                amount = plan.amount_minor_units,
                currency = %plan.currency,
                error = %e,
                "Charge failed"
            );
            SubscriptionError::payment_failed(e.to_string())
        })?;

        if !receipt.status.is_completed() {
            tracing::warn!(
                user_id = %cmd.user_id,
                customer_id,
                idempotency_key,
                charge_id = %receipt.charge_id,
                status = ?receipt.status,
                "Charge did not complete"
            );
            return Err(SubscriptionError::payment_failed(format!(
                "charge {} ended as {:?}",
                receipt.charge_id, receipt.status
            )));
        }

        Ok(receipt)
    }

    /// Enrols the customer in gateway-side renewals when the plan maps to a
    /// gateway plan. Failure leaves the purchase valid for one period.
    async fn enrol_recurring_billing(
        &self,
        plan: &PlanDescriptor,
        cmd: &CreateSubscriptionCommand,
        customer_id: &str,
        idempotency_key: &str,
        now: Timestamp,
    ) -> Option<BillingSubscription> {
        let gateway_plan_id = plan.gateway_plan_id.clone()?;
        let start_date = plan.cadence.period_end(now).as_datetime().date_naive();

        match self
            .gateway
            .create_billing_subscription(BillingSubscriptionRequest {
                customer_id: customer_id.to_string(),
                card_id: cmd.payment_method_id.clone(),
                gateway_plan_id,
                start_date,
                idempotency_key: format!("{}-billing", idempotency_key),
            })
            .await
        {
            Ok(billing) => Some(billing),
            Err(e) => {
                tracing::warn!(
                    user_id = %cmd.user_id,
                    customer_id,
                    error = %e,
                    "Recurring billing enrolment failed; purchase covers one period"
                );
                None
            }
        }
    }

    /// Logs a charge whose record write failed and leaves a `failed` entry
    /// on the reconciliation ledger, keyed by the charge id.
    async fn unrecorded_charge(
        &self,
        err: DomainError,
        cmd: &CreateSubscriptionCommand,
        plan: &PlanDescriptor,
        receipt: &ChargeReceipt,
        idempotency_key: &str,
    ) -> SubscriptionError {
        tracing::error!(
            user_id = %cmd.user_id,
            charge_id = %receipt.charge_id,
            amount = receipt.amount.amount_minor_units,
            idempotency_key,
            error = %err,
            "Charge succeeded but the subscription was not recorded; reconcile manually"
        );

        if let Some(ledger) = &self.reconciliation {
            let marker = WebhookEventRecord::new(
                format!("charge:{}", receipt.charge_id),
                UNRECORDED_CHARGE_EVENT,
                WebhookOutcome::Failed,
                json!({
                    "user_id": cmd.user_id.as_str(),
                    "plan_id": plan.id,
                    "charge_id": receipt.charge_id,
                    "amount_minor_units": receipt.amount.amount_minor_units,
                    "currency": receipt.amount.currency,
                    "payment_method_id": cmd.payment_method_id,
                    "idempotency_key": idempotency_key,
                }),
                Timestamp::now(),
            )
            .with_reason(err.to_string());
            if let Err(e) = ledger.save(marker).await {
                tracing::error!(
                    charge_id = %receipt.charge_id,
                    error = %e,
                    "Could not write reconciliation marker for unrecorded charge"
                );
            }
        }

        map_write_error(err, &cmd.user_id, SubscriptionError::duplicate_subscription)
    }
}

/// Gateway idempotency key for a purchase attempt.
///
/// Without a client key every attempt gets a fresh key. With one, the key
/// is derived from the user, plan, amount and client key, so a resend of
/// the same purchase collapses at the gateway while a different amount
/// under the same client key does not.
pub fn charge_idempotency_key(
    user_id: &UserId,
    plan_id: &str,
    amount_minor_units: i64,
    client_key: Option<&str>,
) -> String {
    match client_key.map(str::trim).filter(|k| !k.is_empty()) {
        None => Uuid::new_v4().to_string(),
        Some(client_key) => {
            let mut hasher = Sha256::new();
            hasher.update(
                format!("{}:{}:{}:{}", user_id, plan_id, amount_minor_units, client_key).as_bytes(),
            );
            let digest = format!("{:x}", hasher.finalize());
            digest[..32].to_string()
        }
    }
}
