//! Square payment gateway adapter.
//!
//! Implements the `PaymentGateway` port for Square, including:
//! - Customer creation
//! - One-off charges
//! - Card on file management
//! - Recurring billing subscriptions
//! - Webhook signature verification
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - All secrets are handled via `secrecy::SecretString`
//!
//! # Configuration
//!
//! Required environment variables:
//! - `STITCHBOOK__PAYMENT__SQUARE_ACCESS_TOKEN`
//! - `STITCHBOOK__PAYMENT__SQUARE_LOCATION_ID`
//! - `STITCHBOOK__PAYMENT__WEBHOOK_SIGNATURE_KEY`

mod mock_payment_gateway;
mod square_adapter;
mod webhook_verifier;
mod wire_types;

pub use mock_payment_gateway::MockPaymentGateway;
pub use square_adapter::{
    SquareClientError, SquareConfig, SquareEnvironment, SquarePaymentAdapter, SQUARE_API_VERSION,
};
pub use webhook_verifier::{SquareWebhookVerifier, SIGNATURE_HEADER};
pub use wire_types::{ErrorResponse, SquareApiError, SquareMoney};
