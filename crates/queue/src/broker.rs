//! Broker-agnostic queue contract.
//!
//! Producers see a [`Publisher`]; consumers see a [`Consumer`] that hands out one
//! [`Delivery`] at a time. A delivery is settled by passing it back by value to
//! [`Consumer::ack`] or [`Consumer::nack`], so it can only be settled once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use mass_notify_common::error::AppError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The consumer already holds an unacknowledged delivery.
    #[error("prefetch limit reached: delivery {0} is not settled")]
    PrefetchExceeded(Uuid),

    #[error("unknown delivery {0}")]
    UnknownDelivery(Uuid),
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Serialization(e) => AppError::Internal(format!("serialization error: {}", e)),
            other => AppError::Queue(other.to_string()),
        }
    }
}

/// The broker-side representation of a queued message.
///
/// `body` is the serialized payload and is never inspected by the queue itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub delivery_id: Uuid,
    /// Number of completed (failed) delivery attempts so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub body: String,
}

impl Envelope {
    pub fn new(body: String) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            attempts: 0,
            enqueued_at: Utc::now(),
            body,
        }
    }

    /// The same message after one more failed attempt.
    pub fn retried(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A message handed to a consumer, awaiting acknowledgment.
#[derive(Debug)]
pub struct Delivery {
    pub(crate) envelope: Envelope,
    /// Exact broker representation, used to remove the message on settlement.
    pub(crate) raw: String,
}

impl Delivery {
    pub(crate) fn new(envelope: Envelope, raw: String) -> Self {
        Self { envelope, raw }
    }

    pub fn id(&self) -> Uuid {
        self.envelope.delivery_id
    }

    pub fn body(&self) -> &str {
        &self.envelope.body
    }

    /// Failed attempts before this one.
    pub fn attempts(&self) -> u32 {
        self.envelope.attempts
    }

    pub fn redelivered(&self) -> bool {
        self.envelope.attempts > 0
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hand a serialized payload to the broker. Returns once the broker has
    /// accepted it; no consumer-side acknowledgment is awaited.
    async fn publish(&self, body: String) -> Result<(), QueueError>;
}

#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next message. At most one delivery is outstanding per
    /// consumer; calling this while one is unsettled fails with
    /// [`QueueError::PrefetchExceeded`]. `None` means the queue was closed.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError>;

    /// Positively acknowledge: the message is removed permanently.
    async fn ack(&mut self, delivery: Delivery) -> Result<(), QueueError>;

    /// Negatively acknowledge. With `requeue` the message is redelivered
    /// immediately; without it the message is moved to the dead-letter queue.
    async fn nack(&mut self, delivery: Delivery, requeue: bool) -> Result<(), QueueError>;
}

/// Serialize `value` and publish it.
pub async fn publish_json<P, T>(publisher: &P, value: &T) -> Result<(), QueueError>
where
    P: Publisher + ?Sized,
    T: Serialize + Sync,
{
    let body = serde_json::to_string(value)?;
    publisher.publish(body).await
}
