//! HTTP adapter for subscription endpoints.
//!
//! Exposes the subscription domain via REST API, mounted under `/api`:
//! - `GET /subscriptions/plans` - List plans
//! - `GET /subscriptions/me` - Subscription summary
//! - `GET /subscriptions/access` - Advisory access info
//! - `GET /subscriptions/premium` - Blocking gate probe
//! - `POST /subscriptions/trial` - Start trial
//! - `POST /subscriptions` - Purchase a plan
//! - `POST /subscriptions/cancel` - Cancel
//! - `GET|POST /subscriptions/cards`, `DELETE /subscriptions/cards/:card_id` - Stored cards
//! - `POST /webhooks/square` - Gateway webhooks

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{SubscriptionApiError, SubscriptionAppState};
pub use routes::{subscription_router, subscription_routes, webhook_routes};
