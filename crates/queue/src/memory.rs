//! In-process broker with the same contract as the Redis queue.
//!
//! The broker itself enforces the prefetch limit of one per consumer, records
//! every delivery and settlement, and supports fault injection. A consumer
//! dropped while holding a message behaves like a disconnect: the message is
//! redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::broker::{Consumer, Delivery, Envelope, Publisher, QueueError};

/// Something that happened on the broker, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Published(Uuid),
    Delivered { consumer: Uuid, delivery: Uuid },
    Acked { consumer: Uuid, delivery: Uuid },
    Nacked { consumer: Uuid, delivery: Uuid, requeue: bool },
}

#[derive(Default)]
struct State {
    /// Front is the oldest message.
    ready: VecDeque<Envelope>,
    outstanding: HashMap<Uuid, Envelope>,
    acked: Vec<Envelope>,
    dead: Vec<Envelope>,
    events: Vec<BrokerEvent>,
    closed: bool,
    unavailable: bool,
    failing_acks: u32,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            id: Uuid::new_v4(),
        }
    }

    /// Make publishing fail as if the connection were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Fail the next `count` acknowledgments. A failed ack leaves the message
    /// unacknowledged, so it is redelivered.
    pub fn fail_next_acks(&self, count: u32) {
        self.state().failing_acks = count;
    }

    /// Stop handing out messages once the ready list is drained.
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// Bodies waiting for delivery, oldest first.
    pub fn ready_bodies(&self) -> Vec<String> {
        self.state().ready.iter().map(|e| e.body.clone()).collect()
    }

    pub fn acked(&self) -> Vec<Envelope> {
        self.state().acked.clone()
    }

    pub fn dead_letters(&self) -> Vec<Envelope> {
        self.state().dead.clone()
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.state().events.clone()
    }

    pub fn outstanding(&self) -> usize {
        self.state().outstanding.len()
    }

    fn requeue(&self, state: &mut State, envelope: Envelope) {
        state.ready.push_front(envelope.retried());
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, body: String) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(QueueError::Unavailable("connection refused".to_string()));
        }

        let envelope = Envelope::new(body);
        state.events.push(BrokerEvent::Published(envelope.delivery_id));
        state.ready.push_back(envelope);
        drop(state);

        self.inner.notify.notify_waiters();
        Ok(())
    }
}

pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    id: Uuid,
}

impl InMemoryConsumer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn try_take(&self) -> Result<Option<Option<Delivery>>, QueueError> {
        let mut state = self.broker.state();
        if let Some(held) = state.outstanding.get(&self.id) {
            return Err(QueueError::PrefetchExceeded(held.delivery_id));
        }

        match state.ready.pop_front() {
            Some(envelope) => {
                state.events.push(BrokerEvent::Delivered {
                    consumer: self.id,
                    delivery: envelope.delivery_id,
                });
                state.outstanding.insert(self.id, envelope.clone());
                let raw = envelope.body.clone();
                Ok(Some(Some(Delivery::new(envelope, raw))))
            }
            None if state.closed => Ok(Some(None)),
            None => Ok(None),
        }
    }

    fn settle(&self, state: &mut State, delivery: &Delivery) -> Result<Envelope, QueueError> {
        match state.outstanding.get(&self.id) {
            Some(held) if held.delivery_id == delivery.id() => state
                .outstanding
                .remove(&self.id)
                .ok_or(QueueError::UnknownDelivery(delivery.id())),
            _ => Err(QueueError::UnknownDelivery(delivery.id())),
        }
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let notified = self.broker.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take()? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), QueueError> {
        let broker = self.broker.clone();
        let mut state = broker.state();
        let envelope = self.settle(&mut state, &delivery)?;

        if state.failing_acks > 0 {
            state.failing_acks -= 1;
            broker.requeue(&mut state, envelope);
            return Err(QueueError::Unavailable("ack lost".to_string()));
        }

        state.events.push(BrokerEvent::Acked {
            consumer: self.id,
            delivery: envelope.delivery_id,
        });
        state.acked.push(envelope);
        Ok(())
    }

    async fn nack(&mut self, delivery: Delivery, requeue: bool) -> Result<(), QueueError> {
        let broker = self.broker.clone();
        let mut state = broker.state();
        let envelope = self.settle(&mut state, &delivery)?;

        state.events.push(BrokerEvent::Nacked {
            consumer: self.id,
            delivery: envelope.delivery_id,
            requeue,
        });
        if requeue {
            broker.requeue(&mut state, envelope);
        } else {
            state.dead.push(envelope.retried());
        }
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        let broker = self.broker.clone();
        let mut state = broker.state();
        if let Some(envelope) = state.outstanding.remove(&self.id) {
            broker.requeue(&mut state, envelope);
        }
    }
}
