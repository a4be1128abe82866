//! HTTP handlers for subscription endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::adapters::http::middleware::AuthenticatedUser;
use crate::adapters::square::SIGNATURE_HEADER;
use crate::application::handlers::subscription::{
    AccessMode, AddCardCommand, CancelSubscriptionCommand, CancelSubscriptionHandler,
    CheckAccessHandler, CheckAccessQuery, CreateSubscriptionCommand, CreateSubscriptionHandler,
    DisableCardCommand, GetSubscriptionHandler, GetSubscriptionQuery, HandleGatewayWebhookCommand,
    HandleGatewayWebhookHandler, ListCardsQuery, ListPlansHandler, ListPlansQuery,
    ManagePaymentMethodsHandler, StartTrialCommand, StartTrialHandler, DEFAULT_TRIAL_DAYS,
};
use crate::domain::foundation::DomainError;
use crate::domain::subscription::{PlanCatalog, SubscriptionError};
use crate::ports::{
    PaymentGateway, SubscriptionRepository, UserAccountRepository, WebhookEventRepository,
    WebhookSignatureVerifier,
};

use super::dto::{
    AccessResponse, AddCardRequest, CancelSubscriptionRequest, CancelSubscriptionResponse,
    CardResponse, CardsResponse, CreateSubscriptionRequest, CreateSubscriptionResponse,
    ErrorResponse, PlanResponse, PlansResponse, PremiumRequiredDetails, StartTrialRequest,
    SubscriptionResponse, SubscriptionSummaryResponse, TrialResponse, WebhookAckResponse,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned for each request; every dependency is behind an `Arc`.
#[derive(Clone)]
pub struct SubscriptionAppState {
    pub subscription_repository: Arc<dyn SubscriptionRepository>,
    pub user_repository: Arc<dyn UserAccountRepository>,
    pub webhook_event_repository: Arc<dyn WebhookEventRepository>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub plan_catalog: Arc<PlanCatalog>,
    /// Absent when no signature key is configured.
    pub webhook_verifier: Option<Arc<dyn WebhookSignatureVerifier>>,
    pub default_trial_days: u32,
}

impl SubscriptionAppState {
    /// State with no webhook verification and the default trial length.
    pub fn new(
        subscription_repository: Arc<dyn SubscriptionRepository>,
        user_repository: Arc<dyn UserAccountRepository>,
        webhook_event_repository: Arc<dyn WebhookEventRepository>,
        payment_gateway: Arc<dyn PaymentGateway>,
        plan_catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            subscription_repository,
            user_repository,
            webhook_event_repository,
            payment_gateway,
            plan_catalog,
            webhook_verifier: None,
            default_trial_days: DEFAULT_TRIAL_DAYS,
        }
    }

    pub fn with_webhook_verifier(mut self, verifier: Arc<dyn WebhookSignatureVerifier>) -> Self {
        self.webhook_verifier = Some(verifier);
        self
    }

    pub fn with_default_trial_days(mut self, days: u32) -> Self {
        self.default_trial_days = days;
        self
    }

    pub fn start_trial_handler(&self) -> StartTrialHandler {
        StartTrialHandler::new(
            self.subscription_repository.clone(),
            self.user_repository.clone(),
        )
        .with_default_trial_days(self.default_trial_days)
    }

    pub fn create_subscription_handler(&self) -> CreateSubscriptionHandler {
        CreateSubscriptionHandler::new(
            self.subscription_repository.clone(),
            self.user_repository.clone(),
            self.payment_gateway.clone(),
            self.plan_catalog.clone(),
        )
        .with_reconciliation_ledger(self.webhook_event_repository.clone())
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(
            self.subscription_repository.clone(),
            self.payment_gateway.clone(),
        )
    }

    pub fn get_subscription_handler(&self) -> GetSubscriptionHandler {
        GetSubscriptionHandler::new(
            self.subscription_repository.clone(),
            self.user_repository.clone(),
        )
    }

    pub fn check_access_handler(&self) -> CheckAccessHandler {
        CheckAccessHandler::new(
            self.subscription_repository.clone(),
            self.user_repository.clone(),
        )
    }

    pub fn list_plans_handler(&self) -> ListPlansHandler {
        ListPlansHandler::new(self.plan_catalog.clone())
    }

    pub fn payment_methods_handler(&self) -> ManagePaymentMethodsHandler {
        ManagePaymentMethodsHandler::new(
            self.subscription_repository.clone(),
            self.user_repository.clone(),
            self.payment_gateway.clone(),
        )
    }

    pub fn webhook_handler(&self) -> HandleGatewayWebhookHandler {
        let handler = HandleGatewayWebhookHandler::new(
            self.subscription_repository.clone(),
            self.webhook_event_repository.clone(),
        );
        match &self.webhook_verifier {
            Some(verifier) => handler.with_verifier(verifier.clone()),
            None => handler,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/subscriptions/plans - List purchasable plans
pub async fn list_plans(State(state): State<SubscriptionAppState>) -> impl IntoResponse {
    let result = state.list_plans_handler().handle(ListPlansQuery);
    Json(PlansResponse {
        plans: result.plans.into_iter().map(PlanResponse::from).collect(),
    })
}

/// GET /api/subscriptions/me - Current user's subscription summary
pub async fn get_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .get_subscription_handler()
        .handle(GetSubscriptionQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(SubscriptionResponse {
        subscription: result.subscription.map(SubscriptionSummaryResponse::from),
        access: AccessResponse::from(result.access),
        trial_used: result.trial_used,
    }))
}

/// GET /api/subscriptions/access - Advisory access check
pub async fn check_access(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .check_access_handler()
        .handle(CheckAccessQuery {
            user_id: user.user_id,
            mode: AccessMode::Advisory,
        })
        .await?;

    Ok(Json(AccessResponse::from(result.access)))
}

/// GET /api/subscriptions/premium - Blocking gate probe
///
/// Sits behind the premium gate layer, so reaching it means access.
pub async fn premium_probe() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// GET /api/subscriptions/cards - List stored cards
pub async fn list_cards(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let cards = state
        .payment_methods_handler()
        .list(ListCardsQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(CardsResponse {
        cards: cards.into_iter().map(CardResponse::from).collect(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST/DELETE endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/subscriptions/trial - Start the one-time trial
pub async fn start_trial(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    body: Option<Json<StartTrialRequest>>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let result = state
        .start_trial_handler()
        .handle(StartTrialCommand {
            user_id: user.user_id,
            trial_days: request.trial_days,
        })
        .await?;

    let response = TrialResponse {
        subscription: result.subscription.into(),
        premium_access_until: result.premium_access_until.as_datetime().to_rfc3339(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/subscriptions - Purchase a plan
pub async fn create_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .create_subscription_handler()
        .handle(CreateSubscriptionCommand {
            user_id: user.user_id,
            plan_id: request.plan_id,
            payment_method_id: request.payment_method_id,
            idempotency_key: request.idempotency_key,
        })
        .await?;

    let response = CreateSubscriptionResponse {
        subscription: result.subscription.into(),
        charge: result.receipt.into(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/subscriptions/cancel - Cancel at period end (default) or now
pub async fn cancel_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    body: Option<Json<CancelSubscriptionRequest>>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let result = state
        .cancel_subscription_handler()
        .handle(CancelSubscriptionCommand {
            user_id: user.user_id,
            cancel_at_period_end: request.cancel_at_period_end,
        })
        .await?;

    Ok(Json(CancelSubscriptionResponse {
        subscription: result.subscription.into(),
        access_until: result.access_until.map(|t| t.as_datetime().to_rfc3339()),
    }))
}

/// POST /api/subscriptions/cards - Store a card on file
pub async fn add_card(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Json(request): Json<AddCardRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let card = state
        .payment_methods_handler()
        .add(AddCardCommand {
            user_id: user.user_id,
            source_id: request.source_id,
            cardholder_name: request.cardholder_name,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CardResponse::from(card))))
}

/// DELETE /api/subscriptions/cards/:card_id - Disable a stored card
pub async fn disable_card(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Path(card_id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let card = state
        .payment_methods_handler()
        .disable(DisableCardCommand {
            user_id: user.user_id,
            card_id,
        })
        .await?;

    Ok(Json(CardResponse::from(card)))
}

/// POST /api/webhooks/square - Gateway webhook
///
/// Answers 200 once the event is in the ledger, whatever its outcome.
pub async fn handle_square_webhook(
    State(state): State<SubscriptionAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let result = state
        .webhook_handler()
        .handle(HandleGatewayWebhookCommand {
            payload: body.to_vec(),
            signature,
        })
        .await?;

    Ok(Json(WebhookAckResponse {
        received: true,
        event_id: result.event_id,
        outcome: result.outcome,
        duplicate: result.duplicate,
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts subscription errors to HTTP responses.
#[derive(Debug)]
pub struct SubscriptionApiError(pub SubscriptionError);

impl From<SubscriptionError> for SubscriptionApiError {
    fn from(err: SubscriptionError) -> Self {
        Self(err)
    }
}

impl From<DomainError> for SubscriptionApiError {
    fn from(err: DomainError) -> Self {
        Self(err.into())
    }
}

impl SubscriptionApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SubscriptionError::InvalidInput { .. } | SubscriptionError::InvalidPlan(_) => {
                StatusCode::BAD_REQUEST
            }
            SubscriptionError::TrialAlreadyUsed(_)
            | SubscriptionError::AlreadySubscribed(_)
            | SubscriptionError::DuplicateSubscription(_)
            | SubscriptionError::InvalidState { .. } => StatusCode::CONFLICT,
            SubscriptionError::SubscriptionNotFound(_) | SubscriptionError::UserNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SubscriptionError::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,
            SubscriptionError::PremiumRequired(_) => StatusCode::FORBIDDEN,
            SubscriptionError::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
            SubscriptionError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SubscriptionApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let error_code = self.0.code().to_string();

        match &self.0 {
            SubscriptionError::Infrastructure(detail) => {
                tracing::error!(error = %detail, "Request failed");
            }
            SubscriptionError::PaymentFailed { reason } => {
                tracing::warn!(reason = %reason, "Payment failed");
            }
            _ => {}
        }

        let body = match &self.0 {
            SubscriptionError::PremiumRequired(denial) => {
                let details = serde_json::to_value(PremiumRequiredDetails::from(*denial))
                    .unwrap_or(serde_json::Value::Null);
                ErrorResponse::with_details(error_code, self.0.message(), details)
            }
            _ => ErrorResponse::new(error_code, self.0.message()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use crate::domain::subscription::{AccessDenial, UserSubscriptionStatus};
    use axum::body::to_bytes;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    async fn body_json(err: SubscriptionError) -> (StatusCode, serde_json::Value) {
        let response = SubscriptionApiError(err).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Error Mapping
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn client_errors_map_to_4xx() {
        let cases = [
            (SubscriptionError::invalid_input("trial_days", "must be positive"), StatusCode::BAD_REQUEST),
            (SubscriptionError::invalid_plan("gold"), StatusCode::BAD_REQUEST),
            (SubscriptionError::trial_already_used(user()), StatusCode::CONFLICT),
            (SubscriptionError::already_subscribed(user()), StatusCode::CONFLICT),
            (SubscriptionError::duplicate_subscription(user()), StatusCode::CONFLICT),
            (SubscriptionError::not_found(user()), StatusCode::NOT_FOUND),
            (SubscriptionError::user_not_found(user()), StatusCode::NOT_FOUND),
            (SubscriptionError::payment_failed("declined"), StatusCode::PAYMENT_REQUIRED),
            (SubscriptionError::InvalidWebhookSignature, StatusCode::UNAUTHORIZED),
        ];

        for (err, expected) in cases {
            assert_eq!(SubscriptionApiError(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn infrastructure_error_hides_detail() {
        let (status, json) =
            body_json(SubscriptionError::infrastructure("connection refused to 10.0.0.5")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error_code"], "INTERNAL_ERROR");
        assert!(!json["message"].as_str().unwrap().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn premium_required_carries_diagnostics() {
        let denial = AccessDenial {
            current_plan: UserSubscriptionStatus::Cancelled,
            trial_used: true,
            has_subscription_record: true,
            premium_access_until: None,
        };

        let (status, json) = body_json(SubscriptionError::premium_required(denial)).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error_code"], "PREMIUM_REQUIRED");
        assert_eq!(json["details"]["suggested_action"], "resubscribe");
        assert_eq!(json["details"]["current_plan"], "cancelled");
    }

    #[tokio::test]
    async fn payment_failure_is_402() {
        let (status, json) = body_json(SubscriptionError::payment_failed("GENERIC_DECLINE")).await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(json["error_code"], "PAYMENT_FAILED");
    }
}
