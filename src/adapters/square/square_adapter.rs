//! Square payment gateway adapter.
//!
//! Implements the `PaymentGateway` port against the Square REST API.
//!
//! # Security
//!
//! - The access token is held as a `secrecy::SecretString` and only exposed
//!   when building the `Authorization` header
//! - Every mutating call carries the caller's idempotency key
//!
//! # Configuration
//!
//! ```ignore
//! let config = SquareConfig::new(access_token, location_id)
//!     .with_environment(SquareEnvironment::Sandbox)
//!     .with_timeout(Duration::from_secs(10));
//! let adapter = SquarePaymentAdapter::new(config)?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::{
    BillingSubscription, BillingSubscriptionRequest, ChargeReceipt, ChargeRequest,
    CreateCustomerRequest, GatewayCustomer, PaymentError, PaymentErrorCode, PaymentGateway,
    StoreCardRequest, StoredCard,
};

use super::wire_types::{
    CardResponse, CreateCardBody, CreateCustomerBody, CreatePaymentBody, CreateSubscriptionBody,
    CustomerResponse, ErrorResponse, ListCardsResponse, NewCard, PaymentResponse, SquareApiError,
    SquareMoney, SubscriptionResponse,
};

/// API version pinned in the `Square-Version` header.
pub const SQUARE_API_VERSION: &str = "2024-01-18";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Which Square environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SquareEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl SquareEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            SquareEnvironment::Sandbox => "https://connect.squareupsandbox.com",
            SquareEnvironment::Production => "https://connect.squareup.com",
        }
    }
}

/// Square API configuration.
#[derive(Clone)]
pub struct SquareConfig {
    access_token: SecretString,
    location_id: String,
    base_url: String,
    timeout: Duration,
}

impl SquareConfig {
    pub fn new(access_token: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            location_id: location_id.into(),
            base_url: SquareEnvironment::default().base_url().to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_environment(mut self, environment: SquareEnvironment) -> Self {
        self.base_url = environment.base_url().to_string();
        self
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Whole-request timeout for every API call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Failures talking to the Square API, before they are mapped to
/// [`PaymentError`].
#[derive(Debug, Error)]
pub enum SquareClientError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Square API returned {status}: {}", summarize(.errors))]
    Api {
        status: u16,
        errors: Vec<SquareApiError>,
    },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

fn summarize(errors: &[SquareApiError]) -> String {
    if errors.is_empty() {
        return "no error detail".to_string();
    }
    errors
        .iter()
        .map(|e| match &e.detail {
            Some(detail) => format!("{} ({})", e.code, detail),
            None => e.code.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<reqwest::Error> for SquareClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SquareClientError::Timeout
        } else {
            SquareClientError::Transport(err)
        }
    }
}

impl From<SquareClientError> for PaymentError {
    fn from(err: SquareClientError) -> Self {
        match &err {
            SquareClientError::Timeout => PaymentError::timeout(err.to_string()),
            SquareClientError::Transport(_) => PaymentError::network(err.to_string()),
            SquareClientError::Decode(_) => PaymentError::provider(err.to_string()),
            SquareClientError::Api { status, errors } => {
                let first = errors.first();
                let code = first.map_or_else(
                    || status_code(*status),
                    |e| error_code(&e.category, &e.code, *status),
                );
                let error = PaymentError::new(code, err.to_string());
                match first {
                    Some(e) => error.with_provider_code(e.code.clone()),
                    None => error,
                }
            }
        }
    }
}

fn error_code(category: &str, code: &str, status: u16) -> PaymentErrorCode {
    match code {
        "GENERIC_DECLINE" | "CVV_FAILURE" | "ADDRESS_VERIFICATION_FAILURE" | "CARD_DECLINED"
        | "CARD_DECLINED_VERIFICATION_REQUIRED" | "TRANSACTION_LIMIT" => {
            return PaymentErrorCode::CardDeclined
        }
        "INSUFFICIENT_FUNDS" => return PaymentErrorCode::InsufficientFunds,
        "CARD_EXPIRED" => return PaymentErrorCode::CardExpired,
        "INVALID_CARD" | "INVALID_CARD_DATA" | "INVALID_EXPIRATION" | "CARD_TOKEN_USED" => {
            return PaymentErrorCode::InvalidCard
        }
        "NOT_FOUND" => return PaymentErrorCode::NotFound,
        _ => {}
    }
    match category {
        "AUTHENTICATION_ERROR" => PaymentErrorCode::AuthenticationError,
        "RATE_LIMIT_ERROR" => PaymentErrorCode::RateLimitExceeded,
        "PAYMENT_METHOD_ERROR" => PaymentErrorCode::CardDeclined,
        "INVALID_REQUEST_ERROR" => PaymentErrorCode::InvalidRequest,
        _ => status_code(status),
    }
}

fn status_code(status: u16) -> PaymentErrorCode {
    match status {
        401 | 403 => PaymentErrorCode::AuthenticationError,
        404 => PaymentErrorCode::NotFound,
        429 => PaymentErrorCode::RateLimitExceeded,
        400..=499 => PaymentErrorCode::InvalidRequest,
        _ => PaymentErrorCode::ProviderError,
    }
}

/// Square payment gateway adapter.
pub struct SquarePaymentAdapter {
    config: SquareConfig,
    http_client: reqwest::Client,
}

impl SquarePaymentAdapter {
    pub fn new(config: SquareConfig) -> Result<Self, SquareClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(SquareClientError::Transport)?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, self.url(path))
            .bearer_auth(self.config.access_token.expose_secret())
            .header("Square-Version", SQUARE_API_VERSION)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, SquareClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, SquareClientError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SquareClientError> {
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let envelope: ErrorResponse = serde_json::from_slice(&body).unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                errors = %summarize(&envelope.errors),
                "Square API call failed"
            );
            return Err(SquareClientError::Api {
                status: status.as_u16(),
                errors: envelope.errors,
            });
        }

        serde_json::from_slice(&body).map_err(|e| SquareClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for SquarePaymentAdapter {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<GatewayCustomer, PaymentError> {
        let body = CreateCustomerBody {
            idempotency_key: &request.idempotency_key,
            reference_id: request.user_id.as_str(),
            email_address: request.email.as_deref(),
        };
        let response: CustomerResponse = self.post("/v2/customers", &body).await?;
        Ok(GatewayCustomer {
            id: response.customer.id,
        })
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        let body = CreatePaymentBody {
            idempotency_key: &request.idempotency_key,
            source_id: &request.payment_method_id,
            amount_money: SquareMoney::from_money(&request.amount),
            customer_id: &request.customer_id,
            location_id: &self.config.location_id,
            autocomplete: true,
            note: request.note.as_deref(),
        };
        let response: PaymentResponse = self.post("/v2/payments", &body).await?;
        response.payment.into_receipt()
    }

    async fn list_stored_cards(&self, customer_id: &str) -> Result<Vec<StoredCard>, PaymentError> {
        let mut cards = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("customer_id", customer_id), ("include_disabled", "false")];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }
            let page: ListCardsResponse = self.get("/v2/cards", &query).await?;
            cards.extend(page.cards.into_iter().map(StoredCard::from));

            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(cards)
    }

    async fn create_stored_card(
        &self,
        request: StoreCardRequest,
    ) -> Result<StoredCard, PaymentError> {
        let body = CreateCardBody {
            idempotency_key: &request.idempotency_key,
            source_id: &request.source_id,
            card: NewCard {
                customer_id: &request.customer_id,
                cardholder_name: request.cardholder_name.as_deref(),
            },
        };
        let response: CardResponse = self.post("/v2/cards", &body).await?;
        Ok(response.card.into())
    }

    async fn disable_stored_card(&self, card_id: &str) -> Result<StoredCard, PaymentError> {
        let path = format!("/v2/cards/{}/disable", card_id);
        let response: CardResponse = self.post(&path, &serde_json::json!({})).await?;
        Ok(response.card.into())
    }

    async fn create_billing_subscription(
        &self,
        request: BillingSubscriptionRequest,
    ) -> Result<BillingSubscription, PaymentError> {
        let body = CreateSubscriptionBody {
            idempotency_key: &request.idempotency_key,
            location_id: &self.config.location_id,
            plan_variation_id: &request.gateway_plan_id,
            customer_id: &request.customer_id,
            card_id: &request.card_id,
            start_date: request.start_date.format("%Y-%m-%d").to_string(),
        };
        let response: SubscriptionResponse = self.post("/v2/subscriptions", &body).await?;
        Ok(response.subscription.into())
    }

    async fn cancel_billing_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, PaymentError> {
        let path = format!("/v2/subscriptions/{}/cancel", subscription_id);
        let response: SubscriptionResponse = self.post(&path, &serde_json::json!({})).await?;
        Ok(response.subscription.into())
    }
}
