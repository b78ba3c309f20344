use serde::Deserialize;

/// Default number of delivery attempts before a notification is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 10;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default `getUpdates` long-poll timeout of the bot, in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Redis broker connection parameters. Shared by the receiver and the notifier.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl BrokerConfig {
    pub fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: required(lookup, "REDIS_HOST")?,
            port: parse(lookup, "REDIS_PORT", None)?,
            username: required(lookup, "REDIS_USERNAME")?,
            password: required(lookup, "REDIS_PASSWORD")?,
        })
    }

    /// Connection URL in the form accepted by `redis::Client::open`.
    pub fn url(&self) -> String {
        format!(
            "redis://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// PostgreSQL parameters for the user directory.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: required(lookup, "PGHOST")?,
            port: parse(lookup, "PGPORT", None)?,
            user: required(lookup, "PGUSER")?,
            password: required(lookup, "PGPASSWORD")?,
            dbname: required(lookup, "PGDATABASE")?,
            max_connections: parse(lookup, "DB_MAX_CONNECTIONS", Some(10))?,
        })
    }

    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

/// Configuration of the ingestion service (`mass-notify-receiver`).
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,

    /// HTTP bind address, `host:port`
    pub bind_addr: String,
}

impl ReceiverConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = required(lookup, "HTTP_SERVER_HOST")?;
        let port: u16 = parse(lookup, "HTTP_SERVER_PORT", None)?;

        Ok(Self {
            broker: BrokerConfig::from_lookup(lookup)?,
            database: DatabaseConfig::from_lookup(lookup)?,
            bind_addr: format!("{}:{}", host, port),
        })
    }
}

/// Configuration of the delivery service (`mass-notify-notifier`).
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub broker: BrokerConfig,

    /// Telegram bot token
    pub telegram_token: String,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// Name of this consumer; its processing list is recovered on restart
    pub consumer_name: String,

    /// Delivery attempts before dead-lettering. `0` retries forever.
    pub max_delivery_attempts: u32,
}

impl NotifierConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            broker: BrokerConfig::from_lookup(lookup)?,
            telegram_token: required(lookup, "TELEGRAM_APITOKEN")?,
            telegram_api_url: telegram_api_url(lookup),
            consumer_name: lookup("NOTIFIER_CONSUMER_NAME")
                .unwrap_or_else(|| "notifier".to_string()),
            max_delivery_attempts: parse(
                lookup,
                "NOTIFIER_MAX_DELIVERY_ATTEMPTS",
                Some(DEFAULT_MAX_DELIVERY_ATTEMPTS),
            )?,
        })
    }

    /// The retry cap, `None` when retries are unbounded.
    pub fn delivery_attempt_limit(&self) -> Option<u32> {
        (self.max_delivery_attempts > 0).then_some(self.max_delivery_attempts)
    }
}

/// Configuration of the registration bot (`mass-notify-bot`).
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub database: DatabaseConfig,

    /// Telegram bot token
    pub telegram_token: String,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// `getUpdates` long-poll timeout in seconds (default: 30)
    pub poll_timeout_secs: u64,
}

impl BotConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database: DatabaseConfig::from_lookup(lookup)?,
            telegram_token: required(lookup, "TELEGRAM_APITOKEN")?,
            telegram_api_url: telegram_api_url(lookup),
            poll_timeout_secs: parse(lookup, "BOT_POLL_TIMEOUT_SECS", Some(DEFAULT_POLL_TIMEOUT_SECS))?,
        })
    }
}

fn telegram_api_url<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string())
}

fn required<F>(lookup: &F, key: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
}

fn parse<F, T>(lookup: &F, key: &str, default: Option<T>) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match (lookup(key), default) {
        (Some(raw), _) => raw.parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(anyhow::anyhow!("{} environment variable is required", key)),
    }
}
