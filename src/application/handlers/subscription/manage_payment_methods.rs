//! ManagePaymentMethodsHandler - Stored card listing, creation and removal.
//!
//! Cards live at the gateway under the user's gateway customer. All three
//! operations need that customer to exist already; it is created by the
//! first purchase.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::foundation::UserId;
use crate::domain::subscription::SubscriptionError;
use crate::ports::{
    PaymentError, PaymentErrorCode, PaymentGateway, StoreCardRequest, StoredCard,
    SubscriptionRepository, UserAccountRepository,
};

use super::load_user;

#[derive(Debug, Clone)]
pub struct ListCardsQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct AddCardCommand {
    pub user_id: UserId,
    /// Single-use card token from the client SDK.
    pub source_id: String,
    pub cardholder_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DisableCardCommand {
    pub user_id: UserId,
    pub card_id: String,
}

pub struct ManagePaymentMethodsHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    users: Arc<dyn UserAccountRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl ManagePaymentMethodsHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        users: Arc<dyn UserAccountRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            users,
            gateway,
        }
    }

    pub async fn list(&self, query: ListCardsQuery) -> Result<Vec<StoredCard>, SubscriptionError> {
        let customer_id = self.customer_id(&query.user_id).await?;
        self.gateway
            .list_stored_cards(&customer_id)
            .await
            .map_err(|e| gateway_error(&query.user_id, "list cards", e))
    }

    pub async fn add(&self, cmd: AddCardCommand) -> Result<StoredCard, SubscriptionError> {
        if cmd.source_id.trim().is_empty() {
            return Err(SubscriptionError::invalid_input("source_id", "cannot be empty"));
        }
        let customer_id = self.customer_id(&cmd.user_id).await?;

        let card = self
            .gateway
            .create_stored_card(StoreCardRequest {
                customer_id,
                source_id: cmd.source_id,
                cardholder_name: cmd.cardholder_name,
                idempotency_key: Uuid::new_v4().to_string(),
            })
            .await
            .map_err(|e| gateway_error(&cmd.user_id, "store card", e))?;

        tracing::info!(user_id = %cmd.user_id, card_id = %card.id, "Card stored");
        Ok(card)
    }

    pub async fn disable(&self, cmd: DisableCardCommand) -> Result<StoredCard, SubscriptionError> {
        let customer_id = self.customer_id(&cmd.user_id).await?;

        let owned = self
            .gateway
            .list_stored_cards(&customer_id)
            .await
            .map_err(|e| gateway_error(&cmd.user_id, "list cards", e))?
            .iter()
            .any(|card| card.id == cmd.card_id);
        if !owned {
            return Err(SubscriptionError::invalid_input(
                "card_id",
                "card does not belong to this account",
            ));
        }

        let card = self
            .gateway
            .disable_stored_card(&cmd.card_id)
            .await
            .map_err(|e| gateway_error(&cmd.user_id, "disable card", e))?;

        tracing::info!(user_id = %cmd.user_id, card_id = %card.id, "Card disabled");
        Ok(card)
    }

    async fn customer_id(&self, user_id: &UserId) -> Result<String, SubscriptionError> {
        let user = load_user(self.users.as_ref(), user_id).await?;
        if let Some(customer_id) = user.gateway_customer_id {
            return Ok(customer_id);
        }
        self.subscriptions
            .find_by_user_id(user_id)
            .await?
            .and_then(|record| record.gateway_customer_id)
            .ok_or_else(|| {
                SubscriptionError::invalid_input(
                    "customer",
                    "no payment profile exists for this account yet",
                )
            })
    }
}

/// Card problems are payment failures; anything else is the gateway's fault.
fn gateway_error(user_id: &UserId, action: &str, err: PaymentError) -> SubscriptionError {
    tracing::warn!(user_id = %user_id, action, error = %err, "Gateway card operation failed");
    match err.code {
        PaymentErrorCode::CardDeclined
        | PaymentErrorCode::CardExpired
        | PaymentErrorCode::InvalidCard
        | PaymentErrorCode::InsufficientFunds
        | PaymentErrorCode::InvalidRequest => SubscriptionError::payment_failed(err.to_string()),
        _ => SubscriptionError::infrastructure(format!("{}: {}", action, err)),
    }
}
