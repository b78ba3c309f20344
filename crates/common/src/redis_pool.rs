use redis::Client;
use redis::aio::ConnectionManager;

use crate::config::BrokerConfig;

/// Open the broker connection. One per service instance; it is multiplexed, so
/// clones can be handed to concurrent publishers.
pub async fn connect_broker(config: &BrokerConfig) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(config.url())?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!(host = %config.host, port = config.port, "Connected to Redis broker");
    Ok(manager)
}
