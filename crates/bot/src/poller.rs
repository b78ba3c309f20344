//! Long-polling loop: fetch updates, answer each message with its command reply.

use std::time::Duration;

use async_trait::async_trait;

use mass_notify_notifier::sender::{ChatClient, SendError};
use mass_notify_notifier::telegram::{TelegramClient, Update};

use crate::commands::CommandParser;
use crate::repository::AccessRepository;

/// Pause after a failed `getUpdates` before polling again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, SendError>;
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, SendError> {
        TelegramClient::get_updates(self, offset, timeout_secs).await
    }
}

pub struct BotPoller<A, R> {
    api: A,
    parser: CommandParser<R>,
    /// Next update id to ask for; everything below it is confirmed.
    offset: i64,
    timeout_secs: u64,
}

impl<A, R> BotPoller<A, R>
where
    A: UpdateSource + ChatClient,
    R: AccessRepository,
{
    pub fn new(api: A, parser: CommandParser<R>, timeout_secs: u64) -> Self {
        Self {
            api,
            parser,
            offset: 0,
            timeout_secs,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Poll forever. Failed polls are logged and retried after a pause.
    pub async fn run(&mut self) {
        tracing::info!(timeout_secs = self.timeout_secs, "Bot polling started");
        loop {
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "Failed to fetch updates, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    /// One `getUpdates` round. Returns the number of updates handled.
    pub async fn poll_once(&mut self) -> Result<usize, SendError> {
        let updates = self.api.get_updates(self.offset, self.timeout_secs).await?;
        let count = updates.len();

        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            self.handle(update).await;
        }
        Ok(count)
    }

    async fn handle(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let chat_id = message.chat.id;
        let text = message.text.unwrap_or_default();

        tracing::info!(
            chat_id,
            username = ?message.chat.username,
            text = %text,
            "Received a message from the bot API"
        );

        let reply = self
            .parser
            .handle(chat_id, message.chat.username.as_deref(), &text)
            .await;

        if let Err(e) = self.api.send_message(chat_id, &reply).await {
            tracing::error!(chat_id, error = %e, "Failed to send reply");
        }
    }
}
