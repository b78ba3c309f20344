//! Mass Notify ingestion server binary entrypoint.

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mass_notify_common::config::ReceiverConfig;
use mass_notify_common::db::create_pool;
use mass_notify_common::redis_pool::connect_broker;
use mass_notify_common::types::NOTIFICATION_QUEUE;
use mass_notify_queue::RedisQueue;

use mass_notify_receiver::directory::PgDirectory;
use mass_notify_receiver::routes::create_router;
use mass_notify_receiver::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("mass_notify_receiver=debug,mass_notify_queue=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Mass Notify receiver...");

    // Load configuration; any missing variable aborts startup
    let config = ReceiverConfig::from_env()?;

    let pool = create_pool(&config.database).await?;
    let broker = connect_broker(&config.broker).await?;
    let queue = RedisQueue::declare(broker, NOTIFICATION_QUEUE).await?;

    let state = AppState::new(
        Arc::new(PgDirectory::new(pool.clone())),
        Arc::new(queue),
    );

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Receiver listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    // The router (and with it the broker connection) is gone once serve returns.
    pool.close().await;
    tracing::info!("Mass Notify receiver stopped.");
    Ok(())
}
