//! User registry and notification access lists.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    AlreadyExists,

    #[error("record does not exist")]
    NotExists,

    /// The acting user has no row in `users`.
    #[error("user is not registered")]
    NotRegistered,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    fn from_write(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::AlreadyExists,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                RepositoryError::NotRegistered
            }
            _ => RepositoryError::Database(err),
        }
    }
}

#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// Register a chat under its username. Fails with `AlreadyExists` if the
    /// chat or the username is taken.
    async fn insert_user(&self, user_id: i64, username: &str) -> Result<(), RepositoryError>;

    async fn get_user(&self, username: &str) -> Result<Option<i64>, RepositoryError>;

    /// Let `username_with_access` send notifications to `user_id`.
    async fn add_notification_access(
        &self,
        user_id: i64,
        username_with_access: &str,
    ) -> Result<(), RepositoryError>;

    async fn remove_notification_access(
        &self,
        user_id: i64,
        username_with_access: &str,
    ) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessRepository for PgRepository {
    async fn insert_user(&self, user_id: i64, username: &str) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO users (id, username, is_active) VALUES ($1, $2, TRUE)")
            .bind(user_id)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from_write)?;
        Ok(())
    }

    async fn get_user(&self, username: &str) -> Result<Option<i64>, RepositoryError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn add_notification_access(
        &self,
        user_id: i64,
        username_with_access: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notification_access (user_id, username_with_access) VALUES ($1, $2)",
        )
        .bind(user_id)
        .bind(username_with_access)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from_write)?;
        Ok(())
    }

    async fn remove_notification_access(
        &self,
        user_id: i64,
        username_with_access: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM notification_access WHERE user_id = $1 AND username_with_access = $2",
        )
        .bind(user_id)
        .bind(username_with_access)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotExists);
        }
        Ok(())
    }
}
