//! Consistency sweep between the metadata store and the search index.
//!
//! The two stores are written without a shared transaction, so a crash or
//! an outage can leave them disagreeing. The sweep republishes an index
//! message for records not updated for `worker.stale_processing_secs` that
//! are:
//!
//! - `INDEXED` with no index entry,
//! - `PROCESSING`,
//! - `UPLOADED`.
//!
//! A republished record has its `updated_at` refreshed, so the next sweep
//! leaves it alone until it goes stale again. `FAILED` records are never
//! touched. Republishing is safe because the worker overwrites the entry
//! for a document id.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{entry_id, now, DocumentRecord, DocumentStatus};
use crate::publisher::IngestionPublisher;
use crate::store::{MetadataStore, SearchIndex};

/// What one sweep republished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub indexed_without_entry: usize,
    pub stale_processing: usize,
    pub stale_uploaded: usize,
    /// Republish attempts that failed; retried on the next sweep.
    pub publish_failures: usize,
}

impl SweepReport {
    pub fn republished(&self) -> usize {
        self.indexed_without_entry + self.stale_processing + self.stale_uploaded
    }
}

pub struct ConsistencySweep {
    metadata: Arc<dyn MetadataStore>,
    index: Arc<dyn SearchIndex>,
    publisher: Arc<IngestionPublisher>,
    stale_after: Duration,
}

impl ConsistencySweep {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn SearchIndex>,
        publisher: Arc<IngestionPublisher>,
        stale_after: Duration,
    ) -> Self {
        Self {
            metadata,
            index,
            publisher,
            stale_after,
        }
    }

    pub async fn run(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for record in self.metadata.find_by_status(DocumentStatus::Indexed).await? {
            if !self.is_stale(&record) {
                continue;
            }
            if self.index.find_by_id(&entry_id(record.id)).await?.is_none() {
                tracing::warn!(document_id = record.id, "INDEXED record has no index entry");
                if self.republish(&record).await {
                    report.indexed_without_entry += 1;
                } else {
                    report.publish_failures += 1;
                }
            }
        }

        for (status, counter) in [
            (DocumentStatus::Processing, &mut report.stale_processing),
            (DocumentStatus::Uploaded, &mut report.stale_uploaded),
        ] {
            for record in self.metadata.find_by_status(status).await? {
                if !self.is_stale(&record) {
                    continue;
                }
                tracing::warn!(
                    document_id = record.id,
                    status = %record.status,
                    updated_at = %record.updated_at,
                    "stale record"
                );
                if self.republish(&record).await {
                    *counter += 1;
                } else {
                    report.publish_failures += 1;
                }
            }
        }

        tracing::info!(
            indexed_without_entry = report.indexed_without_entry,
            stale_processing = report.stale_processing,
            stale_uploaded = report.stale_uploaded,
            publish_failures = report.publish_failures,
            "consistency sweep finished"
        );
        Ok(report)
    }

    /// Runs [`run`](Self::run) every `interval` until `shutdown` flips.
    pub async fn run_periodically(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run().await {
                tracing::error!(error = %err, "consistency sweep failed");
            }
        }
    }

    fn is_stale(&self, record: &DocumentRecord) -> bool {
        let age = now().signed_duration_since(record.updated_at);
        age.to_std().map(|age| age >= self.stale_after).unwrap_or(false)
    }

    async fn republish(&self, record: &DocumentRecord) -> bool {
        if let Err(err) = self.publisher.publish(record).await {
            tracing::error!(document_id = record.id, error = %err, "republish failed");
            return false;
        }
        if let Err(err) = self.metadata.touch(record.id).await {
            tracing::warn!(document_id = record.id, error = %err, "could not refresh updated_at");
        }
        true
    }
}

/// Runs one sweep and prints the report.
pub async fn run_sweep(sweep: &ConsistencySweep) -> anyhow::Result<()> {
    let report = sweep.run().await?;
    println!("Sweep complete.");
    println!("  indexed without entry: {}", report.indexed_without_entry);
    println!("  stale processing:      {}", report.stale_processing);
    println!("  stale uploaded:        {}", report.stale_uploaded);
    if report.publish_failures > 0 {
        println!("  publish failures:      {}", report.publish_failures);
    }
    Ok(())
}
