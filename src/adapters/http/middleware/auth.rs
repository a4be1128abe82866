//! Authenticated-user extractor.
//!
//! Authentication itself happens upstream; by the time a request reaches
//! this service the gateway in front of it has put the caller's id in the
//! `X-User-Id` header.
//!
//! ```ignore
//! async fn my_handler(user: AuthenticatedUser) -> impl IntoResponse {
//!     format!("Hello, {}!", user.user_id)
//! }
//! ```

use axum::{
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::UserId;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The caller, as identified by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

impl AuthenticatedUser {
    /// Reads the user id header, if present and well formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| UserId::new(s.trim()).ok())
            .map(|user_id| AuthenticatedUser { user_id })
    }
}

/// Rejection when no user id was supplied.
#[derive(Debug)]
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error_code": "AUTHENTICATION_REQUIRED",
                "message": "Authentication is required"
            })),
        )
            .into_response()
    }
}

impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move { AuthenticatedUser::from_headers(&parts.headers).ok_or(AuthenticationRequired) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRequestParts;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<AuthenticatedUser, AuthenticationRequired> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AuthenticatedUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_user_from_header() {
        let user = extract(Some("user-42")).await.unwrap();
        assert_eq!(user.user_id.as_str(), "user-42");
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        assert!(extract(None).await.is_err());
    }

    #[tokio::test]
    async fn blank_header_is_rejected() {
        assert!(extract(Some("   ")).await.is_err());
    }

    #[test]
    fn rejection_is_401() {
        assert_eq!(
            AuthenticationRequired.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
