//! Payment gateway port.
//!
//! The gateway charges cards, stores cards on file and runs recurring
//! billing. Monetary amounts cross this boundary only as [`Money`] in
//! integer minor units; adapters convert whatever the wire carries before
//! returning.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, UserId};

/// Port for payment gateway integrations.
///
/// Every mutating call takes an idempotency key; implementations must pass
/// it through so a retried request is not applied twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<GatewayCustomer, PaymentError>;

    /// Charges a payment method (card on file or single-use token).
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, PaymentError>;

    async fn list_stored_cards(&self, customer_id: &str) -> Result<Vec<StoredCard>, PaymentError>;

    /// Stores a card for a customer from a single-use token.
    async fn create_stored_card(&self, request: StoreCardRequest)
        -> Result<StoredCard, PaymentError>;

    async fn disable_stored_card(&self, card_id: &str) -> Result<StoredCard, PaymentError>;

    /// Enrols a customer in recurring billing for a gateway plan.
    async fn create_billing_subscription(
        &self,
        request: BillingSubscriptionRequest,
    ) -> Result<BillingSubscription, PaymentError>;

    /// Stops renewals. The gateway lets the paid period run out.
    async fn cancel_billing_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<BillingSubscription, PaymentError>;
}

/// An amount in integer minor units (cents for USD).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor_units: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_minor_units: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor_units,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCustomerRequest {
    /// Stored on the gateway customer as a reference id.
    pub user_id: UserId,
    pub email: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCustomer {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: Money,
    pub payment_method_id: String,
    pub customer_id: String,
    pub idempotency_key: String,
    pub note: Option<String>,
}

/// Gateway-reported charge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Completed,
    Approved,
    Pending,
    Failed,
    Canceled,
}

impl ChargeStatus {
    /// Maps the gateway's upper-case status; anything unknown is `Failed`.
    pub fn from_gateway(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "COMPLETED" => ChargeStatus::Completed,
            "APPROVED" => ChargeStatus::Approved,
            "PENDING" => ChargeStatus::Pending,
            "CANCELED" | "CANCELLED" => ChargeStatus::Canceled,
            _ => ChargeStatus::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ChargeStatus::Completed)
    }
}

/// Sanitised result of a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeReceipt {
    pub charge_id: String,
    pub status: ChargeStatus,
    pub amount: Money,
}

/// A card on file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredCard {
    pub id: String,
    pub customer_id: Option<String>,
    pub last4: String,
    pub brand: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCardRequest {
    pub customer_id: String,
    /// Single-use token from the client SDK.
    pub source_id: String,
    pub cardholder_name: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSubscriptionRequest {
    pub customer_id: String,
    pub card_id: String,
    pub gateway_plan_id: String,
    /// First day the gateway bills.
    pub start_date: NaiveDate,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSubscription {
    pub id: String,
    pub status: String,
    pub version: Option<i64>,
}

/// Errors from payment gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub message: String,
    /// The gateway's own error code, if it sent one.
    pub provider_code: Option<String>,
    pub retryable: bool,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    pub fn card_declined(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::CardDeclined, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(PaymentErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ProviderError, message)
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(provider_code) = &self.provider_code {
            write!(f, " ({})", provider_code)?;
        }
        Ok(())
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for DomainError {
    fn from(err: PaymentError) -> Self {
        use crate::domain::foundation::ErrorCode;

        let code = match err.code {
            PaymentErrorCode::CardDeclined
            | PaymentErrorCode::InsufficientFunds
            | PaymentErrorCode::CardExpired
            | PaymentErrorCode::InvalidCard => ErrorCode::PaymentFailed,
            PaymentErrorCode::InvalidRequest => ErrorCode::ValidationFailed,
            _ => ErrorCode::ExternalServiceError,
        };

        DomainError::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    NetworkError,
    Timeout,
    AuthenticationError,
    CardDeclined,
    InsufficientFunds,
    CardExpired,
    InvalidCard,
    InvalidRequest,
    NotFound,
    RateLimitExceeded,
    ProviderError,
    Unknown,
}

impl PaymentErrorCode {
    /// Check if this error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError
                | PaymentErrorCode::Timeout
                | PaymentErrorCode::RateLimitExceeded
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::CardDeclined => "card_declined",
            PaymentErrorCode::InsufficientFunds => "insufficient_funds",
            PaymentErrorCode::CardExpired => "card_expired",
            PaymentErrorCode::InvalidCard => "invalid_card",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::ProviderError => "provider_error",
            PaymentErrorCode::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}
