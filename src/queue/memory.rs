//! In-process [`WorkQueue`] for tests and single-process runs.
//!
//! All state sits behind one `tokio::sync::Mutex`. Leases use
//! `tokio::time::Instant`, so tests can drive expiry with paused time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Delivery, QueueError, QueueTopology, WorkQueue};

#[derive(Debug, Clone)]
enum MessageState {
    Ready,
    Leased { until: Instant },
    Dead,
}

#[derive(Debug, Clone)]
struct Message {
    payload: String,
    deliveries: u32,
    state: MessageState,
}

#[derive(Debug)]
struct QueueState {
    max_deliveries: u32,
    visibility_timeout: Duration,
    messages: BTreeMap<i64, Message>,
}

#[derive(Debug, Default)]
struct Broker {
    exchanges: HashSet<String>,
    bindings: HashSet<(String, String, String)>,
    queues: HashMap<String, QueueState>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    broker: Mutex<Broker>,
    unavailable: AtomicBool,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `publish` fail with [`QueueError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Payloads currently waiting or leased in `queue`, oldest first.
    pub async fn pending_payloads(&self, queue: &str) -> Vec<String> {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(queue)
            .map(|q| {
                q.messages
                    .values()
                    .filter(|m| !matches!(m.state, MessageState::Dead))
                    .map(|m| m.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn declare(&self, topology: &QueueTopology) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        broker.exchanges.insert(topology.exchange.clone());
        broker
            .queues
            .entry(topology.queue.clone())
            .and_modify(|q| {
                q.max_deliveries = topology.max_deliveries;
                q.visibility_timeout = topology.visibility_timeout;
            })
            .or_insert_with(|| QueueState {
                max_deliveries: topology.max_deliveries,
                visibility_timeout: topology.visibility_timeout,
                messages: BTreeMap::new(),
            });
        broker.bindings.insert((
            topology.exchange.clone(),
            topology.routing_key.clone(),
            topology.queue.clone(),
        ));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker offline".into()));
        }
        let mut broker = self.broker.lock().await;
        let targets: Vec<String> = broker
            .bindings
            .iter()
            .filter(|(e, k, _)| e == exchange && k == routing_key)
            .map(|(_, _, q)| q.clone())
            .collect();
        if targets.is_empty() {
            return Err(QueueError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        for queue in targets {
            broker.next_id += 1;
            let id = broker.next_id;
            if let Some(q) = broker.queues.get_mut(&queue) {
                q.messages.insert(
                    id,
                    Message {
                        payload: payload.to_string(),
                        deliveries: 0,
                        state: MessageState::Ready,
                    },
                );
            }
        }
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let mut broker = self.broker.lock().await;
        let q = broker
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        let now = Instant::now();

        for (id, msg) in q.messages.iter_mut() {
            let visible = match msg.state {
                MessageState::Ready => true,
                MessageState::Leased { until } => until <= now,
                MessageState::Dead => false,
            };
            if !visible {
                continue;
            }
            if msg.deliveries >= q.max_deliveries {
                tracing::warn!(message_id = id, "lease expired after max deliveries; dead-lettering");
                msg.state = MessageState::Dead;
                continue;
            }
            msg.deliveries += 1;
            msg.state = MessageState::Leased {
                until: now + q.visibility_timeout,
            };
            return Ok(Some(Delivery {
                message_id: *id,
                queue: queue.to_string(),
                attempt: msg.deliveries,
                payload: msg.payload.clone(),
            }));
        }
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        let q = broker
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;
        match q.messages.get(&delivery.message_id) {
            Some(m) if m.deliveries == delivery.attempt && matches!(m.state, MessageState::Leased { .. }) => {
                q.messages.remove(&delivery.message_id);
                Ok(())
            }
            _ => Err(QueueError::LeaseLost(delivery.message_id)),
        }
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut broker = self.broker.lock().await;
        let q = broker
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;
        let max = q.max_deliveries;
        match q.messages.get_mut(&delivery.message_id) {
            Some(m) if m.deliveries == delivery.attempt && matches!(m.state, MessageState::Leased { .. }) => {
                m.state = if requeue && m.deliveries < max {
                    MessageState::Ready
                } else {
                    MessageState::Dead
                };
                Ok(())
            }
            _ => Err(QueueError::LeaseLost(delivery.message_id)),
        }
    }

    async fn pending_count(&self, queue: &str) -> Result<usize, QueueError> {
        let broker = self.broker.lock().await;
        let q = broker
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        Ok(q.messages
            .values()
            .filter(|m| !matches!(m.state, MessageState::Dead))
            .count())
    }

    async fn dead_letter_count(&self, queue: &str) -> Result<usize, QueueError> {
        let broker = self.broker.lock().await;
        let q = broker
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        Ok(q.messages
            .values()
            .filter(|m| matches!(m.state, MessageState::Dead))
            .count())
    }
}
