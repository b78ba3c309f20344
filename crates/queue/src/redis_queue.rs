//! Redis-backed durable queue.
//!
//! Layout for a queue named `q`:
//! - `q`: ready list. Producers `LPUSH`, consumers take from the right.
//! - `q:processing:<consumer>`: the (at most one) message a consumer holds.
//! - `q:dead`: dead-letter list.
//!
//! Taking a message is a single `BLMOVE` from the ready list into the
//! consumer's processing list, so a message is never lost between the broker
//! and the consumer. Whatever a crashed consumer left in its processing list
//! is put back on the ready list by [`RedisConsumer::recover`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::broker::{Consumer, Delivery, Envelope, Publisher, QueueError};

/// How long a single `BLMOVE` blocks before it is reissued.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

pub fn processing_key(queue: &str, consumer: &str) -> String {
    format!("{}:processing:{}", queue, consumer)
}

pub fn dead_letter_key(queue: &str) -> String {
    format!("{}:dead", queue)
}

/// Handle to a named queue. Cheap to clone; all clones share the multiplexed
/// broker connection.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    name: String,
}

impl RedisQueue {
    /// Bind to the queue `name`. Lists are created implicitly by Redis, so the
    /// only declaration work is checking that the server persists its data.
    pub async fn declare(conn: ConnectionManager, name: &str) -> Result<Self, QueueError> {
        let mut queue = Self {
            conn,
            name: name.to_string(),
        };
        queue.check_persistence().await;

        let depth = queue.depth().await?;
        tracing::info!(queue = %queue.name, depth, "Queue declared");
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages waiting for a consumer.
    pub async fn depth(&mut self) -> Result<u64, QueueError> {
        let len: u64 = redis::cmd("LLEN")
            .arg(&self.name)
            .query_async(&mut self.conn)
            .await?;
        Ok(len)
    }

    /// Number of dead-lettered messages.
    pub async fn dead_letter_depth(&mut self) -> Result<u64, QueueError> {
        let len: u64 = redis::cmd("LLEN")
            .arg(dead_letter_key(&self.name))
            .query_async(&mut self.conn)
            .await?;
        Ok(len)
    }

    /// Create a consumer with a stable name. Use the same name across restarts
    /// so unacknowledged messages of a previous run are recovered.
    pub fn consumer(&self, consumer_name: &str) -> RedisConsumer {
        RedisConsumer {
            conn: self.conn.clone(),
            queue: self.name.clone(),
            processing: processing_key(&self.name, consumer_name),
            dead_letter: dead_letter_key(&self.name),
            in_flight: None,
            needs_recovery: false,
        }
    }

    async fn check_persistence(&mut self) {
        let result: redis::RedisResult<Vec<String>> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("appendonly")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(values) if values.get(1).map(String::as_str) == Some("yes") => {
                tracing::debug!(queue = %self.name, "Broker has AOF persistence enabled");
            }
            Ok(_) => {
                tracing::warn!(
                    queue = %self.name,
                    "Broker AOF persistence is disabled; queued notifications may not survive a restart"
                );
            }
            Err(e) => {
                tracing::debug!(error = %e, "Could not inspect broker persistence settings");
            }
        }
    }
}

#[async_trait]
impl Publisher for RedisQueue {
    async fn publish(&self, body: String) -> Result<(), QueueError> {
        let envelope = Envelope::new(body);
        let raw = serde_json::to_string(&envelope)?;

        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("LPUSH")
            .arg(&self.name)
            .arg(&raw)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            queue = %self.name,
            delivery_id = %envelope.delivery_id,
            "Message published"
        );
        Ok(())
    }
}

/// A single consumer of a [`RedisQueue`], holding at most one unsettled message.
pub struct RedisConsumer {
    conn: ConnectionManager,
    queue: String,
    processing: String,
    dead_letter: String,
    in_flight: Option<uuid::Uuid>,
    /// Set when a settlement command failed and the message may still sit in
    /// the processing list.
    needs_recovery: bool,
}

impl RedisConsumer {
    /// Return messages left in this consumer's processing list to the front of
    /// the ready list, counting the interrupted delivery as an attempt. Run at
    /// startup for a previous crash, and after a failed settlement.
    pub async fn recover(&mut self) -> Result<usize, QueueError> {
        let leftovers: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.processing)
            .arg(0)
            .arg(-1)
            .query_async(&mut self.conn)
            .await?;

        for raw in &leftovers {
            let requeued = match serde_json::from_str::<Envelope>(raw) {
                Ok(envelope) => serde_json::to_string(&envelope.retried())?,
                Err(_) => raw.clone(),
            };
            let _: () = redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(&self.processing)
                .arg(1)
                .arg(raw)
                .ignore()
                .cmd("RPUSH")
                .arg(&self.queue)
                .arg(&requeued)
                .ignore()
                .query_async(&mut self.conn)
                .await?;
        }

        if !leftovers.is_empty() {
            tracing::warn!(
                queue = %self.queue,
                count = leftovers.len(),
                "Recovered unacknowledged messages"
            );
        }
        Ok(leftovers.len())
    }

    /// Messages produced outside this crate carry no envelope; they are
    /// wrapped so the payload still reaches the consumer.
    fn open(raw: String) -> Delivery {
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Delivery::new(envelope, raw),
            Err(_) => Delivery::new(Envelope::new(raw.clone()), raw),
        }
    }

    /// Record a failed settlement command. The next receive puts whatever is
    /// left in the processing list back on the ready list first.
    fn settlement_failed(&mut self, delivery: &Delivery, err: redis::RedisError) -> QueueError {
        tracing::warn!(
            queue = %self.queue,
            delivery_id = %delivery.id(),
            error = %err,
            "Settlement failed, message will be recovered before the next receive"
        );
        self.needs_recovery = true;
        QueueError::Redis(err)
    }

    fn settle(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        match self.in_flight.take() {
            Some(id) if id == delivery.id() => Ok(()),
            Some(other) => {
                self.in_flight = Some(other);
                Err(QueueError::UnknownDelivery(delivery.id()))
            }
            None => Err(QueueError::UnknownDelivery(delivery.id())),
        }
    }
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError> {
        if let Some(id) = self.in_flight {
            return Err(QueueError::PrefetchExceeded(id));
        }
        if self.needs_recovery {
            self.recover().await?;
            self.needs_recovery = false;
        }

        loop {
            let raw: Option<String> = redis::cmd("BLMOVE")
                .arg(&self.queue)
                .arg(&self.processing)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(POLL_TIMEOUT.as_secs_f64())
                .query_async(&mut self.conn)
                .await?;

            if let Some(raw) = raw {
                let delivery = Self::open(raw);
                self.in_flight = Some(delivery.id());
                return Ok(Some(delivery));
            }
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), QueueError> {
        self.settle(&delivery)?;

        let result: redis::RedisResult<u64> = redis::cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(&delivery.raw)
            .query_async(&mut self.conn)
            .await;
        let removed = result.map_err(|e| self.settlement_failed(&delivery, e))?;

        if removed == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id()));
        }
        Ok(())
    }

    async fn nack(&mut self, delivery: Delivery, requeue: bool) -> Result<(), QueueError> {
        self.settle(&delivery)?;

        let retried = serde_json::to_string(&delivery.envelope.retried())?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(&delivery.raw)
            .ignore();
        if requeue {
            // Right end is the consuming end: redelivered next, without delay.
            pipe.cmd("RPUSH").arg(&self.queue).arg(&retried).ignore();
        } else {
            pipe.cmd("LPUSH").arg(&self.dead_letter).arg(&retried).ignore();
        }

        let result: redis::RedisResult<()> = pipe.query_async(&mut self.conn).await;
        result.map_err(|e| self.settlement_failed(&delivery, e))
    }
}
