//! Indexing worker: drives a document through
//! `UPLOADED → PROCESSING → INDEXED | FAILED`.
//!
//! [`IndexingWorker::process`] runs the state machine for one
//! [`IndexMessage`]. [`IndexingConsumer`] pulls deliveries from the work
//! queue, calls the worker, and settles each delivery:
//!
//! | outcome | settlement |
//! |---------|------------|
//! | indexed | ack |
//! | record missing, or `FAILED` persisted | reject (dead letter) |
//! | `FAILED` could not be persisted | nack + requeue |
//! | payload not decodable | reject |
//!
//! The metadata store and the search index are written separately. If the
//! index write fails after `INDEXED` was persisted, the worker still tries
//! to record `FAILED`; anything left inconsistent is picked up by the
//! consistency sweep.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::WorkerConfig;
use crate::error::StoreError;
use crate::extract::{ExtractError, TextExtractor};
use crate::models::{now, DocumentRecord, DocumentStatus, IndexMessage, SearchIndexEntry};
use crate::queue::{Delivery, QueueError, WorkQueue};
use crate::store::{MetadataStore, SearchIndex};

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("document not found with id: {0}")]
    DocumentNotFound(i64),
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    #[error("metadata store error: {0}")]
    Metadata(#[source] StoreError),
    #[error("search index error: {0}")]
    Index(#[source] StoreError),
}

/// A failed indexing attempt, and whether `FAILED` reached the metadata
/// store.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct IndexingFailure {
    #[source]
    pub error: IndexingError,
    pub failed_status_persisted: bool,
}

impl IndexingFailure {
    pub fn settlement(&self) -> Settlement {
        match (&self.error, self.failed_status_persisted) {
            (IndexingError::DocumentNotFound(_), _) => Settlement::Reject,
            (_, true) => Settlement::Reject,
            (_, false) => Settlement::Requeue,
        }
    }
}

/// How a delivery is settled with the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Reject,
    Requeue,
}

pub struct IndexingWorker {
    metadata: Arc<dyn MetadataStore>,
    index: Arc<dyn SearchIndex>,
    extractor: Arc<dyn TextExtractor>,
    extraction_timeout: Duration,
}

impl IndexingWorker {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn SearchIndex>,
        extractor: Arc<dyn TextExtractor>,
        extraction_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            index,
            extractor,
            extraction_timeout,
        }
    }

    /// Indexes one document. Returns the record as persisted with status
    /// `INDEXED`.
    ///
    /// Safe to call repeatedly for the same message: the index entry id is
    /// derived from the document id, so a rerun overwrites.
    pub async fn process(&self, message: &IndexMessage) -> Result<DocumentRecord, IndexingFailure> {
        let id = message.document_id;

        let mut record = match self.metadata.find_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(document_id = id, "document not found; dropping message");
                return Err(IndexingFailure {
                    error: IndexingError::DocumentNotFound(id),
                    failed_status_persisted: false,
                });
            }
            Err(err) => {
                tracing::error!(document_id = id, error = %err, "metadata lookup failed");
                return Err(IndexingFailure {
                    error: IndexingError::Metadata(err),
                    failed_status_persisted: false,
                });
            }
        };

        tracing::info!(
            document_id = id,
            tenant = %record.tenant_id,
            file_name = %record.file_name,
            "indexing document"
        );

        record.status = DocumentStatus::Processing;
        let record = match self.metadata.save(&record).await {
            Ok(saved) => saved,
            Err(err) => return Err(self.fail(record, IndexingError::Metadata(err)).await),
        };

        let content = match self.extract(&record).await {
            Ok(text) => text,
            Err(err) => return Err(self.fail(record, err.into()).await),
        };

        let mut indexed = record.clone();
        indexed.status = DocumentStatus::Indexed;
        indexed.indexed_at = Some(now());
        let indexed = match self.metadata.save(&indexed).await {
            Ok(saved) => saved,
            Err(err) => return Err(self.fail(record, IndexingError::Metadata(err)).await),
        };

        let entry = SearchIndexEntry::from_record(&indexed, content);
        if let Err(err) = self.index.save(&entry).await {
            tracing::error!(
                document_id = id,
                error = %err,
                "index write failed after INDEXED was recorded"
            );
            return Err(self.fail(indexed, IndexingError::Index(err)).await);
        }

        tracing::info!(
            document_id = id,
            tenant = %indexed.tenant_id,
            chars = entry.content.chars().count(),
            "document indexed"
        );
        Ok(indexed)
    }

    /// Runs extraction on the blocking pool under the configured timeout.
    async fn extract(&self, record: &DocumentRecord) -> Result<String, ExtractError> {
        let path = PathBuf::from(&record.file_path);
        ensure_file(&path).await?;

        let extractor = Arc::clone(&self.extractor);
        let content_type = record.content_type.clone();
        let task = tokio::task::spawn_blocking(move || extractor.extract(&path, &content_type));

        // On timeout the blocking thread runs to completion and its result
        // is discarded.
        match tokio::time::timeout(self.extraction_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ExtractError::Aborted(join.to_string())),
            Err(_) => Err(ExtractError::Timeout(self.extraction_timeout)),
        }
    }

    /// Records `FAILED` for `record` and wraps `error`.
    async fn fail(&self, mut record: DocumentRecord, error: IndexingError) -> IndexingFailure {
        record.status = DocumentStatus::Failed;
        let failed_status_persisted = match self.metadata.save(&record).await {
            Ok(_) => {
                tracing::error!(
                    document_id = record.id,
                    tenant = %record.tenant_id,
                    error = %error,
                    "document marked FAILED"
                );
                true
            }
            Err(store_err) => {
                tracing::error!(
                    document_id = record.id,
                    error = %error,
                    store_error = %store_err,
                    "could not persist FAILED status"
                );
                false
            }
        };
        IndexingFailure {
            error,
            failed_status_persisted,
        }
    }
}

/// Outcome counts of a drain run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub acked: usize,
    pub rejected: usize,
    pub requeued: usize,
}

impl DrainReport {
    fn record(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Ack => self.acked += 1,
            Settlement::Reject => self.rejected += 1,
            Settlement::Requeue => self.requeued += 1,
        }
    }

    fn merge(&mut self, other: DrainReport) {
        self.acked += other.acked;
        self.rejected += other.rejected;
        self.requeued += other.requeued;
    }
}

/// Pulls deliveries from one queue and feeds them to an [`IndexingWorker`].
pub struct IndexingConsumer {
    worker: Arc<IndexingWorker>,
    queue: Arc<dyn WorkQueue>,
    queue_name: String,
    concurrency: usize,
    poll_interval: Duration,
}

impl IndexingConsumer {
    pub fn new(
        worker: Arc<IndexingWorker>,
        queue: Arc<dyn WorkQueue>,
        queue_name: impl Into<String>,
        config: &WorkerConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker,
            queue,
            queue_name: queue_name.into(),
            concurrency: config.concurrency.max(1),
            poll_interval,
        }
    }

    /// Processes and settles one delivery.
    pub async fn handle(&self, delivery: &Delivery) -> Settlement {
        let settlement = match delivery.decode::<IndexMessage>() {
            Ok(message) => match self.worker.process(&message).await {
                Ok(_) => Settlement::Ack,
                Err(failure) => failure.settlement(),
            },
            Err(err) => {
                tracing::error!(
                    message_id = delivery.message_id,
                    error = %err,
                    "undecodable index message"
                );
                Settlement::Reject
            }
        };

        let settled = match settlement {
            Settlement::Ack => self.queue.ack(delivery).await,
            Settlement::Reject => self.queue.reject(delivery).await,
            Settlement::Requeue => self.queue.nack(delivery, true).await,
        };
        if let Err(err) = settled {
            tracing::warn!(
                message_id = delivery.message_id,
                settlement = ?settlement,
                error = %err,
                "failed to settle delivery"
            );
        }
        settlement
    }

    /// Receives and handles at most one delivery.
    pub async fn poll_once(&self) -> Result<Option<Settlement>, QueueError> {
        match self.queue.receive(&self.queue_name).await? {
            Some(delivery) => {
                tracing::debug!(
                    message_id = delivery.message_id,
                    attempt = delivery.attempt,
                    "received delivery"
                );
                Ok(Some(self.handle(&delivery).await))
            }
            None => Ok(None),
        }
    }

    /// Processes deliveries with `concurrency` tasks until none is visible.
    pub async fn drain(self: Arc<Self>) -> Result<DrainReport, QueueError> {
        let mut tasks = JoinSet::new();
        for _ in 0..self.concurrency {
            let consumer = Arc::clone(&self);
            tasks.spawn(async move {
                let mut report = DrainReport::default();
                while let Some(settlement) = consumer.poll_once().await? {
                    report.record(settlement);
                }
                Ok::<_, QueueError>(report)
            });
        }

        let mut total = DrainReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => total.merge(report?),
                Err(err) => tracing::error!(error = %err, "drain task panicked"),
            }
        }
        Ok(total)
    }

    /// Runs `concurrency` consumer loops until `shutdown` flips to `true`.
    /// In-flight deliveries finish before a loop exits.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        for consumer_id in 0..self.concurrency {
            let consumer = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { consumer.consume_loop(consumer_id, shutdown).await });
        }
        tracing::info!(
            queue = %self.queue_name,
            consumers = self.concurrency,
            "indexing consumers started"
        );
        while tasks.join_next().await.is_some() {}
        tracing::info!("indexing consumers stopped");
    }

    async fn consume_loop(&self, consumer_id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(consumer_id, error = %err, "receive failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::debug!(consumer_id, "consumer loop exited");
    }
}

/// `MissingFile` only when the path is known to be absent; any other
/// failure to stat it is an I/O error.
async fn ensure_file(path: &Path) -> Result<(), ExtractError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ExtractError::MissingFile(path.display().to_string())),
        Err(source) => Err(ExtractError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}
