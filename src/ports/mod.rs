//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `SubscriptionRepository` - entitlement records plus the user cache
//! - `UserAccountRepository` - account lookups and gateway customer linkage
//! - `PaymentGateway` - charges, stored cards and recurring billing
//! - `WebhookEventRepository` - webhook idempotency ledger
//! - `WebhookSignatureVerifier` - webhook authenticity check

mod payment_gateway;
mod subscription_repository;
mod user_account_repository;
mod webhook_event_repository;
mod webhook_verifier;

pub use payment_gateway::{
    BillingSubscription, BillingSubscriptionRequest, ChargeReceipt, ChargeRequest, ChargeStatus,
    CreateCustomerRequest, GatewayCustomer, Money, PaymentError, PaymentErrorCode, PaymentGateway,
    StoreCardRequest, StoredCard,
};
pub use subscription_repository::SubscriptionRepository;
pub use user_account_repository::UserAccountRepository;
pub use webhook_event_repository::{SaveResult, WebhookEventRecord, WebhookEventRepository};
pub use webhook_verifier::WebhookSignatureVerifier;
