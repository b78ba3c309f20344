//! Mass Notify delivery worker binary entrypoint.

use mass_notify_common::config::NotifierConfig;
use mass_notify_common::redis_pool::connect_broker;
use mass_notify_common::types::NOTIFICATION_QUEUE;
use mass_notify_queue::RedisQueue;

use mass_notify_notifier::consumer::DeliveryConsumer;
use mass_notify_notifier::sender::FanOutSender;
use mass_notify_notifier::telegram::TelegramClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mass_notify_notifier=info,mass_notify_queue=info".into()),
        )
        .json()
        .init();

    tracing::info!("Mass Notify notifier starting...");

    // Load configuration; any missing variable aborts startup
    let config = NotifierConfig::from_env()?;

    let broker = connect_broker(&config.broker).await?;
    let mut queue = RedisQueue::declare(broker, NOTIFICATION_QUEUE).await?;

    let dead = queue.dead_letter_depth().await?;
    if dead > 0 {
        tracing::warn!(queue = %queue.name(), dead, "Dead-lettered notifications pending inspection");
    }

    let mut consumer = queue.consumer(&config.consumer_name);
    consumer.recover().await?;

    let sender = FanOutSender::new(TelegramClient::new(
        &config.telegram_api_url,
        &config.telegram_token,
    )?);
    let mut delivery = DeliveryConsumer::new(consumer, sender)
        .with_max_attempts(config.delivery_attempt_limit());

    // Run with graceful shutdown on Ctrl+C. An interrupted delivery stays in the
    // processing list and is recovered on the next start.
    let result = tokio::select! {
        result = delivery.run() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            Ok(())
        }
    };

    drop(delivery);
    drop(queue);
    tracing::info!("Broker connection released, Mass Notify notifier stopped.");

    if let Err(e) = &result {
        tracing::error!(error = %e, "Delivery consumer exited with error");
    }
    result
}
