//! Durable work queue between the ingestion publisher and indexing workers.
//!
//! The topology mirrors a topic broker: publishers address an *exchange*
//! with a *routing key*; *bindings* route the message to one or more
//! *queues*; consumers receive from a queue by name.
//!
//! Delivery is at-least-once. A received message is leased to its consumer
//! for the queue's visibility timeout; if it is not settled before the
//! lease expires it becomes visible again and is redelivered. Settlement:
//!
//! | call | effect |
//! |------|--------|
//! | [`WorkQueue::ack`] | message removed |
//! | [`WorkQueue::nack`] with `requeue = true` | visible again, unless `max_deliveries` reached |
//! | [`WorkQueue::reject`] | moved to the dead-letter state |
//!
//! A message that has been delivered `max_deliveries` times and is then
//! requeued or lets its lease expire is dead-lettered rather than
//! redelivered.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::QueueConfig;

/// Exchange, queue, and the binding between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub max_deliveries: u32,
    pub visibility_timeout: Duration,
}

impl QueueTopology {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            exchange: config.exchange.clone(),
            queue: config.queue.clone(),
            routing_key: config.routing_key.clone(),
            max_deliveries: config.max_deliveries,
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
        }
    }
}

/// A message leased to one consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned message id.
    pub message_id: i64,
    pub queue: String,
    /// 1 on first delivery; incremented on each redelivery.
    pub attempt: u32,
    pub payload: String,
}

impl Delivery {
    /// Decodes the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_str(&self.payload).map_err(QueueError::Payload)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue bound to exchange '{exchange}' with routing key '{routing_key}'")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },
    #[error("queue '{0}' has not been declared")]
    UnknownQueue(String),
    /// The lease on this delivery expired and the message was redelivered
    /// or dead-lettered; settlement is ignored.
    #[error("lease on message {0} was lost")]
    LeaseLost(i64),
    #[error("invalid message payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("queue backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Idempotently declares the exchange, queue and binding.
    async fn declare(&self, topology: &QueueTopology) -> Result<(), QueueError>;

    /// Routes `payload` to every queue bound to `exchange` under
    /// `routing_key`. Fails with [`QueueError::Unroutable`] if none is.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), QueueError>;

    /// Leases the oldest visible message of `queue`, if any.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Negative acknowledgement. With `requeue = false` the message is
    /// dead-lettered.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.nack(delivery, false).await
    }

    /// Messages not yet acknowledged or dead-lettered, leased or not.
    async fn pending_count(&self, queue: &str) -> Result<usize, QueueError>;

    async fn dead_letter_count(&self, queue: &str) -> Result<usize, QueueError>;
}
