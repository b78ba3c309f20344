//! End-to-end tests of the delivery pipeline against the in-memory broker.
//!
//! Notifications are published the way the receiver publishes them and then
//! consumed by a `DeliveryConsumer` driving a `FanOutSender` over a recording
//! chat client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mass_notify_common::types::Notification;
use mass_notify_notifier::consumer::DeliveryConsumer;
use mass_notify_notifier::sender::{ChatClient, FanOutSender, SendError};
use mass_notify_queue::memory::BrokerEvent;
use mass_notify_queue::{InMemoryBroker, publish_json};

// ============================================================
// Helpers
// ============================================================

/// Chat client that records every successful send and can be told to fail
/// a recipient a number of times.
#[derive(Clone, Default)]
struct RecordingClient {
    sent: Arc<Mutex<Vec<(i64, String)>>>,
    failures: Arc<Mutex<HashMap<i64, u32>>>,
    broker: Option<InMemoryBroker>,
    max_outstanding: Arc<Mutex<usize>>,
}

impl RecordingClient {
    fn watching(broker: &InMemoryBroker) -> Self {
        Self {
            broker: Some(broker.clone()),
            ..Default::default()
        }
    }

    fn fail(&self, chat_id: i64, times: u32) {
        self.failures.lock().unwrap().insert(chat_id, times);
    }

    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self) -> Vec<i64> {
        self.sent().into_iter().map(|(id, _)| id).collect()
    }
}

#[async_trait]
impl ChatClient for RecordingClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        if let Some(broker) = &self.broker {
            let mut max = self.max_outstanding.lock().unwrap();
            *max = (*max).max(broker.outstanding());
        }

        {
            let mut failures = self.failures.lock().unwrap();
            let remaining = failures.entry(chat_id).or_default();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SendError::Api {
                    code: 502,
                    description: "Bad Gateway".to_string(),
                });
            }
        }

        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

fn notification(message: &str, recipients: &[&str]) -> Notification {
    Notification::new(message, recipients.iter().map(|r| r.to_string()).collect())
}

async fn drain(broker: &InMemoryBroker, client: RecordingClient) {
    broker.close();
    let mut consumer = DeliveryConsumer::new(broker.consumer(), FanOutSender::new(client));
    consumer.run().await.unwrap();
}

// ============================================================
// Pipeline tests
// ============================================================

#[tokio::test]
async fn test_round_trip_delivers_message_to_every_recipient() {
    let broker = InMemoryBroker::new();
    let published = notification("release 1.2 is out", &["100", "200"]);
    publish_json(&broker, &published).await.unwrap();

    let client = RecordingClient::default();
    drain(&broker, client.clone()).await;

    assert_eq!(
        client.sent(),
        vec![
            (100, "release 1.2 is out".to_string()),
            (200, "release 1.2 is out".to_string()),
        ]
    );
    let acked = broker.acked();
    assert_eq!(acked.len(), 1);
    let consumed: Notification = serde_json::from_str(&acked[0].body).unwrap();
    assert_eq!(consumed, published);
}

#[tokio::test]
async fn test_one_message_in_flight_at_a_time() {
    let broker = InMemoryBroker::new();
    for i in 0..5 {
        publish_json(&broker, &notification(&format!("msg {}", i), &["1", "2"]))
            .await
            .unwrap();
    }

    let client = RecordingClient::watching(&broker);
    client.fail(2, 2);
    drain(&broker, client.clone()).await;

    assert_eq!(*client.max_outstanding.lock().unwrap(), 1);

    // Every delivery is settled exactly once before the next one is handed out.
    let mut holding = None;
    for event in broker.events() {
        match event {
            BrokerEvent::Published(_) => {}
            BrokerEvent::Delivered { delivery, .. } => {
                assert!(holding.is_none(), "second delivery before settlement");
                holding = Some(delivery);
            }
            BrokerEvent::Acked { delivery, .. } | BrokerEvent::Nacked { delivery, .. } => {
                assert_eq!(holding.take(), Some(delivery));
            }
        }
    }
    assert!(holding.is_none());
    assert_eq!(broker.acked().len(), 5);
}

#[tokio::test]
async fn test_failure_on_first_recipient_redelivers_full_list() {
    let broker = InMemoryBroker::new();
    publish_json(&broker, &notification("hi", &["100", "200"]))
        .await
        .unwrap();

    let client = RecordingClient::default();
    client.fail(100, 1);
    drain(&broker, client.clone()).await;

    assert_eq!(client.sent_to(), vec![100, 200]);
    let nacks: Vec<bool> = broker
        .events()
        .into_iter()
        .filter_map(|e| match e {
            BrokerEvent::Nacked { requeue, .. } => Some(requeue),
            _ => None,
        })
        .collect();
    assert_eq!(nacks, vec![true]);

    let acked = broker.acked();
    assert_eq!(acked[0].attempts, 1);
    let redelivered: Notification = serde_json::from_str(&acked[0].body).unwrap();
    assert_eq!(redelivered.recipients, vec!["100".to_string(), "200".to_string()]);
}

#[tokio::test]
async fn test_partial_failure_duplicates_earlier_recipients() {
    let broker = InMemoryBroker::new();
    publish_json(&broker, &notification("hi", &["100", "200"]))
        .await
        .unwrap();

    let client = RecordingClient::default();
    client.fail(200, 1);
    drain(&broker, client.clone()).await;

    // Acknowledgment covers the whole recipient list, so 100 hears it twice.
    assert_eq!(client.sent_to(), vec![100, 100, 200]);
    assert_eq!(broker.acked().len(), 1);
}

#[tokio::test]
async fn test_poison_message_does_not_block_the_queue() {
    let broker = InMemoryBroker::new();
    publish_json(&broker, &serde_json::json!({ "text": "wrong shape" }))
        .await
        .unwrap();
    publish_json(&broker, &notification("after poison", &["7"]))
        .await
        .unwrap();

    let client = RecordingClient::default();
    drain(&broker, client.clone()).await;

    assert_eq!(client.sent(), vec![(7, "after poison".to_string())]);
    assert_eq!(broker.acked().len(), 2);
    assert!(broker.dead_letters().is_empty());
}

#[tokio::test]
async fn test_failed_ack_keeps_consuming() {
    let broker = InMemoryBroker::new();
    publish_json(&broker, &notification("first", &["1"]))
        .await
        .unwrap();
    publish_json(&broker, &notification("second", &["2"]))
        .await
        .unwrap();
    broker.fail_next_acks(1);

    let client = RecordingClient::default();
    drain(&broker, client.clone()).await;

    // The lost ack means "first" comes back and is sent again.
    assert_eq!(client.sent_to(), vec![1, 1, 2]);
    assert_eq!(broker.acked().len(), 2);
    assert_eq!(broker.outstanding(), 0);
}

#[tokio::test]
async fn test_retry_cap_dead_letters_after_attempts() {
    let broker = InMemoryBroker::new();
    publish_json(&broker, &notification("never lands", &["9"]))
        .await
        .unwrap();

    let client = RecordingClient::default();
    client.fail(9, u32::MAX);
    broker.close();
    let mut consumer = DeliveryConsumer::new(broker.consumer(), FanOutSender::new(client.clone()))
        .with_max_attempts(Some(4));
    consumer.run().await.unwrap();

    assert!(client.sent().is_empty());
    let dead = broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 4);
}

#[tokio::test]
async fn test_rejected_request_dead_letters_without_retry() {
    struct ChatNotFound;

    #[async_trait]
    impl ChatClient for ChatNotFound {
        async fn send_message(&self, _chat_id: i64, _text: &str) -> Result<(), SendError> {
            Err(SendError::Api {
                code: 400,
                description: "Bad Request: chat not found".to_string(),
            })
        }
    }

    let broker = InMemoryBroker::new();
    publish_json(&broker, &notification("hi", &["404"]))
        .await
        .unwrap();

    broker.close();
    let mut consumer = DeliveryConsumer::new(broker.consumer(), FanOutSender::new(ChatNotFound))
        .with_max_attempts(Some(10));
    consumer.run().await.unwrap();

    let dead = broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 1);
    let nacks: Vec<bool> = broker
        .events()
        .into_iter()
        .filter_map(|e| match e {
            BrokerEvent::Nacked { requeue, .. } => Some(requeue),
            _ => None,
        })
        .collect();
    assert_eq!(nacks, vec![false]);
}
