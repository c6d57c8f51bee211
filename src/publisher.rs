//! Ingestion publisher: turns a persisted document record into an
//! [`IndexMessage`] and hands it to the work queue.
//!
//! A publish failure is returned to the caller. The record stays
//! `UPLOADED` with no message in flight, and the consistency sweep
//! republishes it once it goes stale.

use std::sync::Arc;

use thiserror::Error;

use crate::models::{DocumentRecord, IndexMessage};
use crate::queue::{QueueError, QueueTopology, WorkQueue};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode index message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish message: {0}")]
    Queue(#[from] QueueError),
}

pub struct IngestionPublisher {
    queue: Arc<dyn WorkQueue>,
    exchange: String,
    routing_key: String,
}

impl IngestionPublisher {
    pub fn new(queue: Arc<dyn WorkQueue>, topology: &QueueTopology) -> Self {
        Self {
            queue,
            exchange: topology.exchange.clone(),
            routing_key: topology.routing_key.clone(),
        }
    }

    /// Publishes one index message for `record` and returns it.
    pub async fn publish(&self, record: &DocumentRecord) -> Result<IndexMessage, PublishError> {
        let message = IndexMessage::from(record);
        let payload = serde_json::to_string(&message)?;

        match self
            .queue
            .publish(&self.exchange, &self.routing_key, &payload)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    document_id = record.id,
                    tenant = %record.tenant_id,
                    "published index message"
                );
                Ok(message)
            }
            Err(err) => {
                tracing::error!(
                    document_id = record.id,
                    error = %err,
                    "failed to publish index message"
                );
                Err(err.into())
            }
        }
    }
}
