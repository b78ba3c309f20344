//! User directory lookups: handle (without sigil) → chat identity.

use async_trait::async_trait;
use sqlx::PgPool;

use mass_notify_common::error::AppError;

/// Resolves a username to the user's internal chat identity.
///
/// `Ok(None)` means the user is not registered. `Err` is reserved for the
/// directory itself being unreachable or failing.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<i64>, AppError>;
}

/// Directory backed by the bot's `users` table.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DirectoryLookup for PgDirectory {
    async fn get_user(&self, username: &str) -> Result<Option<i64>, AppError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id,)| id))
    }
}
