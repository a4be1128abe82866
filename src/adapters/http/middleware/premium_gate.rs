//! Access-gate middleware for premium content routes.
//!
//! Two modes:
//! - **Blocking**: a caller without premium access gets `403
//!   PREMIUM_REQUIRED` with diagnostics; the inner handler never runs.
//! - **Advisory**: the request always proceeds. The computed
//!   [`AccessInfo`] is put in request extensions so the handler can
//!   trim premium fields with `premium_preview`.
//!
//! ```ignore
//! let gate = PremiumGate::blocking(state.check_access_handler());
//! let premium = Router::new()
//!     .route("/patterns/:id", get(pattern))
//!     .layer(middleware::from_fn_with_state(gate, premium_gate));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::adapters::http::subscription::SubscriptionApiError;
use crate::application::handlers::subscription::{AccessMode, CheckAccessHandler, CheckAccessQuery};
use crate::domain::subscription::{AccessInfo, UserSubscriptionStatus};

use super::auth::{AuthenticatedUser, AuthenticationRequired};

/// Middleware state: the access handler and the gate's mode.
#[derive(Clone)]
pub struct PremiumGate {
    handler: Arc<CheckAccessHandler>,
    mode: AccessMode,
}

impl PremiumGate {
    pub fn blocking(handler: CheckAccessHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            mode: AccessMode::Blocking,
        }
    }

    pub fn advisory(handler: CheckAccessHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            mode: AccessMode::Advisory,
        }
    }
}

/// Access info for anonymous callers and failed lookups in advisory mode.
fn no_access() -> AccessInfo {
    AccessInfo {
        has_premium_access: false,
        status: UserSubscriptionStatus::Free,
        premium_access_until: None,
    }
}

pub async fn premium_gate(
    State(gate): State<PremiumGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = AuthenticatedUser::from_headers(request.headers());

    let access = match (gate.mode, user) {
        (AccessMode::Blocking, None) => return AuthenticationRequired.into_response(),
        (AccessMode::Advisory, None) => no_access(),
        (mode, Some(user)) => {
            let query = CheckAccessQuery {
                user_id: user.user_id.clone(),
                mode,
            };
            match gate.handler.handle(query).await {
                Ok(result) => result.access,
                Err(err) if mode == AccessMode::Blocking => {
                    return SubscriptionApiError(err).into_response();
                }
                Err(err) => {
                    tracing::warn!(
                        user_id = %user.user_id,
                        error = %err,
                        "Advisory access check failed; serving preview"
                    );
                    no_access()
                }
            }
        }
    };

    request.extensions_mut().insert(access);
    next.run(request).await
}

/// Access info placed by [`premium_gate`]; denies when the gate did not run.
#[derive(Debug, Clone, Copy)]
pub struct PremiumAccess(pub AccessInfo);

impl<S> axum::extract::FromRequestParts<S> for PremiumAccess
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut axum::http::request::Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            Ok(PremiumAccess(
                parts.extensions.get::<AccessInfo>().copied().unwrap_or_else(no_access),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryAccountStore;
    use crate::domain::foundation::{Timestamp, UserId};
    use crate::domain::subscription::{premium_preview, UserAccount};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    const TEXT: &str = "Start with a slip knot and chain twenty stitches loosely.";

    async fn content(PremiumAccess(access): PremiumAccess) -> String {
        premium_preview(TEXT, &access, 10).into_owned()
    }

    async fn store() -> InMemoryAccountStore {
        let store = InMemoryAccountStore::new();
        store
            .insert_user(UserAccount::new(UserId::new("free-user").unwrap()))
            .await;
        let mut premium = UserAccount::new(UserId::new("premium-user").unwrap());
        premium.subscription_status = UserSubscriptionStatus::PremiumMonthly;
        premium.premium_access_until = Some(Timestamp::now().add_days(20));
        store.insert_user(premium).await;
        store
    }

    fn app(store: InMemoryAccountStore, blocking: bool) -> Router {
        let handler = CheckAccessHandler::new(Arc::new(store.clone()), Arc::new(store));
        let gate = if blocking {
            PremiumGate::blocking(handler)
        } else {
            PremiumGate::advisory(handler)
        };
        Router::new()
            .route("/content", get(content))
            .layer(middleware::from_fn_with_state(gate, premium_gate))
    }

    async fn call(app: Router, user: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().uri("/content");
        if let Some(user) = user {
            request = request.header("X-User-Id", user);
        }
        let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn blocking_gate_denies_free_user_with_diagnostics() {
        let (status, body) = call(app(store().await, true), Some("free-user")).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error_code"], "PREMIUM_REQUIRED");
        assert_eq!(json["details"]["suggested_action"], "start_trial");
    }

    #[tokio::test]
    async fn blocking_gate_admits_premium_user() {
        let (status, body) = call(app(store().await, true), Some("premium-user")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, TEXT);
    }

    #[tokio::test]
    async fn blocking_gate_requires_user() {
        let (status, _) = call(app(store().await, true), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn advisory_gate_serves_preview_to_free_user() {
        let (status, body) = call(app(store().await, false), Some("free-user")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with('…'));
        assert!(body.len() < TEXT.len());
    }

    #[tokio::test]
    async fn advisory_gate_serves_preview_to_unknown_user() {
        let (status, body) = call(app(store().await, false), Some("ghost")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with('…'));
    }

    #[tokio::test]
    async fn advisory_gate_serves_full_text_to_premium_user() {
        let (_, body) = call(app(store().await, false), Some("premium-user")).await;
        assert_eq!(body, TEXT);
    }
}
