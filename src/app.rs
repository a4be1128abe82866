//! Process wiring: tracing, adapters, router layers and background tasks.
//!
//! `main.rs` calls into this module; integration tests use [`build_router`]
//! directly with in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use http::{header, HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use sqlx::PgPool;
use thiserror::Error;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::adapters::http::{subscription_router, SubscriptionAppState};
use crate::adapters::memory::InMemoryAccountStore;
use crate::adapters::postgres::{PostgresAccountStore, MIGRATOR};
use crate::adapters::square::{
    MockPaymentGateway, SquareClientError, SquareConfig, SquarePaymentAdapter,
    SquareWebhookVerifier,
};
use crate::config::{
    AppConfig, ConfigError, LogFormat, PaymentProvider, ServerConfig, ValidationError,
};
use crate::domain::foundation::Timestamp;
use crate::domain::subscription::PlanCatalogError;
use crate::ports::{PaymentGateway, WebhookEventRepository};

/// How often the webhook ledger is purged.
const LEDGER_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Startup failures.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Plan catalog: {0}")]
    Plans(#[from] PlanCatalogError),

    #[error("Payment gateway client: {0}")]
    Gateway(#[from] SquareClientError),

    #[error("Server I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&server.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match server.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

/// Adapters selected by configuration.
pub struct Wiring {
    pub state: SubscriptionAppState,
    /// Present when PostgreSQL backs the stores.
    pub pool: Option<PgPool>,
}

/// Build the application state from configuration.
pub async fn wire(config: &AppConfig) -> Result<Wiring, BootstrapError> {
    let catalog = Arc::new(config.subscription.plan_catalog(&config.payment.currency)?);
    let gateway = payment_gateway(config)?;

    let (state, pool) = if config.features.in_memory_store {
        tracing::warn!("Using in-memory store; state is lost on restart");
        let store = Arc::new(if config.features.auto_provision_users {
            InMemoryAccountStore::auto_provisioning()
        } else {
            InMemoryAccountStore::new()
        });
        let state =
            SubscriptionAppState::new(store.clone(), store.clone(), store, gateway, catalog);
        (state, None)
    } else {
        let pool = config.database.connect().await?;
        if config.database.run_migrations {
            MIGRATOR.run(&pool).await?;
            tracing::info!("Database migrations applied");
        }
        let store = Arc::new(PostgresAccountStore::new(pool.clone()));
        let state =
            SubscriptionAppState::new(store.clone(), store.clone(), store, gateway, catalog);
        (state, Some(pool))
    };

    let mut state = state.with_default_trial_days(config.subscription.default_trial_days);
    match config.payment.webhook_verification() {
        Some((key, url)) => {
            state = state.with_webhook_verifier(Arc::new(SquareWebhookVerifier::new(key, url)));
        }
        None => tracing::warn!("No webhook signature key configured; signatures are not checked"),
    }

    Ok(Wiring { state, pool })
}

fn payment_gateway(config: &AppConfig) -> Result<Arc<dyn PaymentGateway>, BootstrapError> {
    let payment = &config.payment;
    match payment.provider {
        PaymentProvider::Mock => {
            tracing::warn!("Using mock payment gateway; no real charges are made");
            Ok(Arc::new(MockPaymentGateway::new()))
        }
        PaymentProvider::Square => {
            let token = payment
                .square_access_token
                .as_ref()
                .ok_or(ValidationError::MissingRequired("PAYMENT__SQUARE_ACCESS_TOKEN"))?;
            let location = payment
                .square_location_id
                .as_deref()
                .ok_or(ValidationError::MissingRequired("PAYMENT__SQUARE_LOCATION_ID"))?;

            use secrecy::ExposeSecret;
            let square = SquareConfig::new(token.expose_secret().as_str(), location)
                .with_environment(payment.square_environment)
                .with_timeout(payment.request_timeout());
            Ok(Arc::new(SquarePaymentAdapter::new(square)?))
        }
    }
}

/// The full HTTP application: API routes under `/api`, a health probe and
/// the cross-cutting layers.
pub fn build_router(state: SubscriptionAppState, server: &ServerConfig) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", subscription_router(state))
        .layer(cors_layer(server))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Periodically delete ledger entries older than `retention_days`.
pub fn spawn_ledger_purge(
    ledger: Arc<dyn WebhookEventRepository>,
    retention_days: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LEDGER_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = Timestamp::now().minus_days(i64::from(retention_days));
            match ledger.delete_before(cutoff).await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, "Purged old webhook events"),
                Err(e) => tracing::warn!(error = %e, "Webhook ledger purge failed"),
            }
        }
    })
}

/// Resolves on Ctrl-C (or SIGTERM on Unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
