//! Storage abstraction for document metadata and the search index.
//!
//! Two traits cover the two durable collaborators of the pipeline:
//!
//! - [`MetadataStore`] owns the lifecycle record of every upload.
//! - [`SearchIndex`] owns the searchable, tenant-scoped copy of each
//!   indexed document, including its extracted text.
//!
//! They are deliberately separate: there is no transaction spanning both,
//! and callers must tolerate the two drifting apart (see `sweep`).
//!
//! Each trait has an in-memory implementation ([`memory`]) used by unit
//! tests and a SQLite implementation ([`sqlite`]) used by the binary.
//! Implementations must be `Send + Sync` to be shared across worker tasks.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{DocumentRecord, DocumentStatus, NewDocument, SearchIndexEntry};
use crate::query::Expr;

/// Durable store of [`DocumentRecord`]s, keyed by numeric id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Inserts a new record with status `UPLOADED` and returns it with its
    /// assigned id.
    async fn create(&self, doc: NewDocument) -> Result<DocumentRecord, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError>;

    /// Persists every mutable field of an existing record, stamps
    /// `updated_at`, and returns the stored version.
    async fn save(&self, record: &DocumentRecord) -> Result<DocumentRecord, StoreError>;

    async fn find_by_status(&self, status: DocumentStatus)
        -> Result<Vec<DocumentRecord>, StoreError>;

    /// Stamps `updated_at` without changing any other field.
    async fn touch(&self, id: i64) -> Result<(), StoreError>;
}

/// A matching index entry and its relevance score, if the query was scored.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub entry: SearchIndexEntry,
    pub score: Option<f64>,
}

/// Full-text search index of [`SearchIndexEntry`]s.
///
/// `save` is an upsert on `entry.id`, so re-indexing a document replaces
/// its previous entry.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn save(&self, entry: &SearchIndexEntry) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SearchIndexEntry>, StoreError>;

    /// Returns the entries matching `expr`, at most `limit` of them when
    /// a limit is given.
    ///
    /// Scored queries (those with at least one `Contains` leaf) come back
    /// ordered by descending score; unscored queries in insertion order.
    async fn query(&self, expr: &Expr, limit: Option<usize>) -> Result<Vec<IndexHit>, StoreError>;

    /// Removes an entry. Returns `false` if it was absent.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
