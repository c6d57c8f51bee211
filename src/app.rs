//! Explicit wiring of the pipeline's collaborators.
//!
//! [`Services`] owns one instance of each collaborator behind `Arc<dyn _>`
//! and builds the components that use them. [`Services::open`] provisions
//! the SQLite backends; [`Services::in_memory`] wires the in-memory ones.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::extract::{FileExtractor, TextExtractor};
use crate::ingest::DocumentIntake;
use crate::provision;
use crate::publisher::IngestionPublisher;
use crate::queue::memory::InMemoryWorkQueue;
use crate::queue::sqlite::SqliteWorkQueue;
use crate::queue::{QueueTopology, WorkQueue};
use crate::search::SearchEngine;
use crate::store::memory::{InMemoryMetadataStore, InMemorySearchIndex};
use crate::store::sqlite::{SqliteMetadataStore, SqliteSearchIndex};
use crate::store::{MetadataStore, SearchIndex};
use crate::sweep::ConsistencySweep;
use crate::worker::{IndexingConsumer, IndexingWorker};

#[derive(Clone)]
pub struct Services {
    pub config: Config,
    pub metadata: Arc<dyn MetadataStore>,
    pub index: Arc<dyn SearchIndex>,
    pub queue: Arc<dyn WorkQueue>,
    pub extractor: Arc<dyn TextExtractor>,
    pub topology: QueueTopology,
    pub publisher: Arc<IngestionPublisher>,
}

impl Services {
    /// Connects to the configured SQLite database, creates the schema and
    /// declares the queue topology.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        provision::create_schema(&pool).await?;
        Self::from_parts(
            config,
            Arc::new(SqliteMetadataStore::new(pool.clone())),
            Arc::new(SqliteSearchIndex::new(pool.clone())),
            Arc::new(SqliteWorkQueue::new(pool)),
        )
        .await
    }

    /// All collaborators in memory; nothing survives the process.
    pub async fn in_memory(config: &Config) -> Result<Self> {
        Self::from_parts(
            config,
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemorySearchIndex::new()),
            Arc::new(InMemoryWorkQueue::new()),
        )
        .await
    }

    /// Wires the given backends and declares the topology on `queue`.
    pub async fn from_parts(
        config: &Config,
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn SearchIndex>,
        queue: Arc<dyn WorkQueue>,
    ) -> Result<Self> {
        let topology = QueueTopology::from_config(&config.queue);
        provision::declare_topology(queue.as_ref(), &topology).await?;
        let publisher = Arc::new(IngestionPublisher::new(Arc::clone(&queue), &topology));
        Ok(Self {
            config: config.clone(),
            metadata,
            index,
            queue,
            extractor: Arc::new(FileExtractor),
            topology,
            publisher,
        })
    }

    /// Replaces the text extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn intake(&self) -> DocumentIntake {
        DocumentIntake::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.publisher),
            self.config.storage.clone(),
        )
    }

    pub fn search_engine(&self) -> SearchEngine {
        SearchEngine::new(Arc::clone(&self.index), self.config.search.clone())
    }

    pub fn worker(&self) -> IndexingWorker {
        IndexingWorker::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.index),
            Arc::clone(&self.extractor),
            Duration::from_secs(self.config.worker.extraction_timeout_secs),
        )
    }

    pub fn consumer(&self) -> IndexingConsumer {
        IndexingConsumer::new(
            Arc::new(self.worker()),
            Arc::clone(&self.queue),
            self.topology.queue.clone(),
            &self.config.worker,
            Duration::from_millis(self.config.queue.poll_interval_ms),
        )
    }

    pub fn sweep(&self) -> ConsistencySweep {
        ConsistencySweep::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.index),
            Arc::clone(&self.publisher),
            Duration::from_secs(self.config.worker.stale_processing_secs),
        )
    }
}
