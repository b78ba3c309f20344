//! Fan-out delivery of a notification to each recipient over the chat platform.

use async_trait::async_trait;
use thiserror::Error;

use mass_notify_common::types::Notification;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid recipient id {0:?}")]
    InvalidRecipient(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("chat API error {code}: {description}")]
    Api { code: i64, description: String },
}

impl SendError {
    /// Errors that will fail the same way on every redelivery: a recipient id
    /// that is not a number, or a request the Bot API rejects as malformed
    /// (400, e.g. "chat not found" or "message is too long").
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SendError::InvalidRecipient(_) | SendError::Api { code: 400, .. }
        )
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL embeds the bot token.
        SendError::Http(err.without_url())
    }
}

/// The chat platform's send-message call.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError>;
}

/// Delivers a whole notification. Success means every recipient got it.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), SendError>;
}

/// Sends to each recipient in order and stops at the first failure.
///
/// A failed notification is retried as a whole, so recipients before the
/// failing one receive it again on redelivery.
pub struct FanOutSender<C> {
    client: C,
}

impl<C: ChatClient> FanOutSender<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: ChatClient> NotificationSender for FanOutSender<C> {
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        // Parse everything first so a bad id fails before anyone is messaged.
        let chat_ids = notification
            .recipients
            .iter()
            .map(|r| {
                r.parse::<i64>()
                    .map_err(|_| SendError::InvalidRecipient(r.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for chat_id in chat_ids {
            if let Err(e) = self.client.send_message(chat_id, &notification.message).await {
                tracing::warn!(chat_id, error = %e, "Failed to send message to recipient");
                return Err(e);
            }
            tracing::debug!(chat_id, "Message sent");
        }
        Ok(())
    }
}
