//! Delivery consumer: takes one message at a time off the queue, hands it to
//! the sender and settles it.
//!
//! Per message: decode → send → ack on success, nack otherwise. A message that
//! does not decode is acknowledged and dropped. A failed send is requeued
//! until it has used up its delivery attempts, then dead-lettered; permanent
//! failures are dead-lettered at once.

use mass_notify_common::types::Notification;
use mass_notify_queue::{Consumer, Delivery, QueueError};

use crate::sender::{NotificationSender, SendError};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acknowledged,
    Requeued,
    DeadLettered,
    /// Undecodable payload, acknowledged without sending.
    Dropped,
}

pub struct DeliveryConsumer<C, S> {
    consumer: C,
    sender: S,
    max_attempts: Option<u32>,
}

impl<C, S> DeliveryConsumer<C, S>
where
    C: Consumer,
    S: NotificationSender,
{
    /// A consumer that requeues failed sends forever.
    pub fn new(consumer: C, sender: S) -> Self {
        Self {
            consumer,
            sender,
            max_attempts: None,
        }
    }

    /// Cap the number of delivery attempts per message. `None` never gives up.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Consume until the queue closes or receiving fails.
    pub async fn run(&mut self) -> Result<(), QueueError> {
        tracing::info!(max_attempts = ?self.max_attempts, "Delivery consumer started");

        while let Some(delivery) = self.consumer.next_delivery().await? {
            self.process(delivery).await;
        }

        tracing::info!("Queue closed, delivery consumer stopping");
        Ok(())
    }

    /// Handle a single delivery to completion, settling it exactly once.
    pub async fn process(&mut self, delivery: Delivery) -> Outcome {
        let delivery_id = delivery.id();
        let attempts = delivery.attempts();

        let notification: Notification = match serde_json::from_str(delivery.body()) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::error!(
                    delivery_id = %delivery_id,
                    error = %e,
                    body = %delivery.body(),
                    "Failed to decode message, dropping it"
                );
                self.ack(delivery).await;
                return Outcome::Dropped;
            }
        };

        tracing::info!(
            delivery_id = %delivery_id,
            attempts,
            recipients = notification.recipients.len(),
            "Received a message from the broker"
        );

        match self.sender.send(&notification).await {
            Ok(()) => {
                self.ack(delivery).await;
                tracing::info!(delivery_id = %delivery_id, "Notification delivered");
                Outcome::Acknowledged
            }
            Err(e) if self.should_requeue(&e, attempts) => {
                tracing::warn!(
                    delivery_id = %delivery_id,
                    attempts = attempts + 1,
                    error = %e,
                    "Delivery failed, requeueing"
                );
                self.nack(delivery, true).await;
                Outcome::Requeued
            }
            Err(e) => {
                tracing::error!(
                    delivery_id = %delivery_id,
                    attempts = attempts + 1,
                    error = %e,
                    "Delivery failed permanently, dead-lettering"
                );
                self.nack(delivery, false).await;
                Outcome::DeadLettered
            }
        }
    }

    fn should_requeue(&self, err: &SendError, attempts: u32) -> bool {
        if err.is_permanent() {
            return false;
        }
        match self.max_attempts {
            Some(max) => attempts.saturating_add(1) < max,
            None => true,
        }
    }

    async fn ack(&mut self, delivery: Delivery) {
        let delivery_id = delivery.id();
        if let Err(e) = self.consumer.ack(delivery).await {
            tracing::error!(delivery_id = %delivery_id, error = %e, "Failed to acknowledge message");
        }
    }

    async fn nack(&mut self, delivery: Delivery, requeue: bool) {
        let delivery_id = delivery.id();
        if let Err(e) = self.consumer.nack(delivery, requeue).await {
            tracing::error!(
                delivery_id = %delivery_id,
                requeue,
                error = %e,
                "Failed to negatively acknowledge message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mass_notify_queue::memory::InMemoryConsumer;
    use mass_notify_queue::{InMemoryBroker, Publisher, publish_json};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakySender {
        failures: Mutex<u32>,
        calls: Mutex<Vec<Notification>>,
    }

    impl FlakySender {
        fn failing(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSender for FlakySender {
        async fn send(&self, notification: &Notification) -> Result<(), SendError> {
            self.calls.lock().unwrap().push(notification.clone());
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SendError::Api {
                    code: 429,
                    description: "Too Many Requests".to_string(),
                });
            }
            Ok(())
        }
    }

    async fn next(consumer: &mut DeliveryConsumer<InMemoryConsumer, FlakySender>) -> Outcome {
        let delivery = consumer.consumer.next_delivery().await.unwrap().unwrap();
        consumer.process(delivery).await
    }

    #[tokio::test]
    async fn test_success_acknowledges() {
        let broker = InMemoryBroker::new();
        publish_json(&broker, &Notification::new("hi", vec!["1".to_string()]))
            .await
            .unwrap();

        let mut consumer = DeliveryConsumer::new(broker.consumer(), FlakySender::failing(0));
        assert_eq!(next(&mut consumer).await, Outcome::Acknowledged);
        assert_eq!(broker.acked().len(), 1);
        assert_eq!(broker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_failure_requeues() {
        let broker = InMemoryBroker::new();
        publish_json(&broker, &Notification::new("hi", vec!["1".to_string()]))
            .await
            .unwrap();

        let mut consumer = DeliveryConsumer::new(broker.consumer(), FlakySender::failing(1));
        assert_eq!(next(&mut consumer).await, Outcome::Requeued);
        assert_eq!(broker.ready_bodies().len(), 1);
        assert_eq!(next(&mut consumer).await, Outcome::Acknowledged);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dropped() {
        let broker = InMemoryBroker::new();
        broker.publish("not json".to_string()).await.unwrap();

        let sender = FlakySender::failing(0);
        let mut consumer = DeliveryConsumer::new(broker.consumer(), sender);
        assert_eq!(next(&mut consumer).await, Outcome::Dropped);

        assert!(consumer.sender.calls.lock().unwrap().is_empty());
        assert_eq!(broker.acked().len(), 1);
        assert!(broker.ready_bodies().is_empty());
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_retry_cap_dead_letters() {
        let broker = InMemoryBroker::new();
        publish_json(&broker, &Notification::new("hi", vec!["1".to_string()]))
            .await
            .unwrap();

        let mut consumer = DeliveryConsumer::new(broker.consumer(), FlakySender::failing(u32::MAX))
            .with_max_attempts(Some(3));
        assert_eq!(next(&mut consumer).await, Outcome::Requeued);
        assert_eq!(next(&mut consumer).await, Outcome::Requeued);
        assert_eq!(next(&mut consumer).await, Outcome::DeadLettered);

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert!(broker.ready_bodies().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let broker = InMemoryBroker::new();
        publish_json(&broker, &Notification::new("hi", vec!["@bob".to_string()]))
            .await
            .unwrap();

        struct Rejecting;

        #[async_trait]
        impl NotificationSender for Rejecting {
            async fn send(&self, notification: &Notification) -> Result<(), SendError> {
                Err(SendError::InvalidRecipient(notification.recipients[0].clone()))
            }
        }

        let mut consumer = DeliveryConsumer::new(broker.consumer(), Rejecting);
        let delivery = consumer.consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(consumer.process(delivery).await, Outcome::DeadLettered);
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_retries_keep_requeueing() {
        let broker = InMemoryBroker::new();
        publish_json(&broker, &Notification::new("hi", vec!["1".to_string()]))
            .await
            .unwrap();

        let mut consumer = DeliveryConsumer::new(broker.consumer(), FlakySender::failing(u32::MAX));
        for _ in 0..25 {
            assert_eq!(next(&mut consumer).await, Outcome::Requeued);
        }
        assert!(broker.dead_letters().is_empty());
    }
}
