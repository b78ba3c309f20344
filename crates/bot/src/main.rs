//! Mass Notify registration bot binary entrypoint.

use tracing_subscriber::EnvFilter;

use mass_notify_common::config::BotConfig;
use mass_notify_common::db::create_pool;
use mass_notify_notifier::telegram::TelegramClient;

use mass_notify_bot::commands::CommandParser;
use mass_notify_bot::poller::BotPoller;
use mass_notify_bot::repository::PgRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mass_notify_bot=info")),
        )
        .init();

    tracing::info!("Starting Mass Notify bot...");

    // Load configuration; any missing variable aborts startup
    let config = BotConfig::from_env()?;

    let pool = create_pool(&config.database).await?;

    // The bot owns the directory schema
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let api = TelegramClient::new(&config.telegram_api_url, &config.telegram_token)?;
    let parser = CommandParser::new(PgRepository::new(pool.clone()));
    let mut poller = BotPoller::new(api, parser, config.poll_timeout_secs);

    tokio::select! {
        _ = poller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    drop(poller);
    pool.close().await;
    tracing::info!("Mass Notify bot stopped.");
    Ok(())
}
