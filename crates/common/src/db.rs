use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;

/// Create a PostgreSQL connection pool for the user directory.
pub async fn create_pool(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&config.url())
        .await?;

    tracing::info!(
        host = %config.host,
        database = %config.dbname,
        max_connections = config.max_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}
