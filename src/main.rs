//! Stitchbook subscription service.

use stitchbook::app::{self, BootstrapError};
use stitchbook::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), BootstrapError> {
    let config = AppConfig::load()?;
    app::init_tracing(&config.server);
    config.validate()?;

    let addr = config.server.socket_addr()?;
    tracing::info!(
        environment = ?config.server.environment,
        in_memory = config.features.in_memory_store,
        "Starting Stitchbook"
    );

    let wiring = app::wire(&config).await?;
    let purge = app::spawn_ledger_purge(
        wiring.state.webhook_event_repository.clone(),
        config.subscription.webhook_retention_days,
    );
    let router = app::build_router(wiring.state, &config.server);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(app::shutdown_signal())
        .await?;

    purge.abort();
    if let Some(pool) = wiring.pool {
        pool.close().await;
    }
    tracing::info!("Stopped");
    Ok(())
}
