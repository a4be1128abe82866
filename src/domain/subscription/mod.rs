//! Subscription domain - entitlements, trials and premium access.
//!
//! The [`Subscription`] aggregate is the authoritative entitlement record.
//! The user account carries a cache of it that [`compute_access`] reads on
//! every content request.

mod access;
mod account;
mod aggregate;
mod entitlement;
mod errors;
mod gateway_event;
mod plan;
mod status;
mod webhook_log;

pub use access::{
    cache_grants_access, compute_access, premium_preview, AccessDenial, AccessInfo,
    SuggestedAction,
};
pub use account::{AccessCacheUpdate, UserAccount};
pub use aggregate::{
    ChargeLinkage, Subscription, SubscriptionSnapshot, SubscriptionSummary, TrialWindow,
};
pub use entitlement::EntitlementState;
pub use errors::SubscriptionError;
pub use gateway_event::{GatewayEvent, GatewayEventType, GatewayInvoice, GatewaySubscription};
pub use plan::{Cadence, PaidPlan, PlanCatalog, PlanCatalogError, PlanDescriptor, PlanType};
pub use status::{SubscriptionStatus, UserSubscriptionStatus};
pub use webhook_log::{WebhookLogEntry, WebhookOutcome};
