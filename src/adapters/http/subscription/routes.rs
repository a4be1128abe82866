//! Axum router configuration for subscription endpoints.

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use super::handlers::{
    add_card, cancel_subscription, check_access, create_subscription, disable_card,
    get_subscription, handle_square_webhook, list_cards, list_plans, premium_probe, start_trial,
    SubscriptionAppState,
};
use crate::adapters::http::middleware::{premium_gate, PremiumGate};

/// Create the subscription API router.
///
/// # Routes
///
/// ## Public
/// - `GET /plans` - Purchasable plans
///
/// ## User Endpoints (require `X-User-Id`)
/// - `GET /me` - Subscription summary
/// - `GET /access` - Advisory access info
/// - `GET /premium` - Blocking gate probe (204, or 403 with diagnostics)
/// - `POST /trial` - Start the one-time trial
/// - `POST /` - Purchase a plan
/// - `POST /cancel` - Cancel
/// - `GET /cards`, `POST /cards` - List / store cards
/// - `DELETE /cards/:card_id` - Disable a stored card
pub fn subscription_routes(state: SubscriptionAppState) -> Router<SubscriptionAppState> {
    let gate = PremiumGate::blocking(state.check_access_handler());

    Router::new()
        .route("/", post(create_subscription))
        .route("/plans", get(list_plans))
        .route("/me", get(get_subscription))
        .route("/access", get(check_access))
        .route(
            "/premium",
            get(premium_probe).layer(middleware::from_fn_with_state(gate, premium_gate)),
        )
        .route("/trial", post(start_trial))
        .route("/cancel", post(cancel_subscription))
        .route("/cards", get(list_cards).post(add_card))
        .route("/cards/:card_id", delete(disable_card))
}

/// Create the gateway webhook router.
///
/// Separate from the user routes because webhooks carry no user identity;
/// they are verified by signature instead.
pub fn webhook_routes() -> Router<SubscriptionAppState> {
    Router::new().route("/square", post(handle_square_webhook))
}

/// Create the complete subscription module router, ready to mount at `/api`.
pub fn subscription_router(state: SubscriptionAppState) -> Router {
    Router::new()
        .nest("/subscriptions", subscription_routes(state.clone()))
        .nest("/webhooks", webhook_routes())
        .with_state(state)
}
