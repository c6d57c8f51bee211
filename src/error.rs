//! Error taxonomy shared by the ingestion path, the search engine, and the
//! HTTP layer.
//!
//! Component-level errors (`StoreError`, `QueueError`, `ExtractError`,
//! `PublishError`, `IndexingError`) live next to the code that raises them
//! and fold into [`DocSearchError`] at the synchronous API boundary.

use thiserror::Error;

use crate::extract::ExtractError;
use crate::publisher::PublishError;
use crate::queue::QueueError;

/// Failure of a metadata store or search index operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The SQLite backend returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored row could not be decoded into its model type.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An update targeted a record that does not exist.
    #[error("document {0} does not exist")]
    MissingRecord(i64),
    #[error(transparent)]
    InvalidQuery(#[from] crate::query::InvalidQuery),
}

/// Errors surfaced to synchronous callers (CLI, HTTP handlers).
#[derive(Debug, Error)]
pub enum DocSearchError {
    /// Missing or blank query/tenant, oversized input, empty upload.
    #[error("{0}")]
    ClientValidation(String),
    /// Absent document, or a document owned by another tenant.
    #[error("{0}")]
    NotFound(String),
    /// Upload exceeds the configured size limit.
    #[error("{0}")]
    PayloadTooLarge(String),
    /// Text could not be extracted from a document.
    #[error("extraction failed: {0}")]
    ExtractionFailure(#[from] ExtractError),
    /// Metadata store or search index failure.
    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),
    /// The index message could not be handed to the work queue.
    #[error("failed to queue document for indexing: {0}")]
    Publish(#[from] PublishError),
    /// Raw file storage failed.
    #[error("file storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<QueueError> for DocSearchError {
    fn from(err: QueueError) -> Self {
        DocSearchError::Publish(PublishError::Queue(err))
    }
}

impl DocSearchError {
    pub fn validation(message: impl Into<String>) -> Self {
        DocSearchError::ClientValidation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DocSearchError::NotFound(message.into())
    }

    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            DocSearchError::ClientValidation(_) => 400,
            DocSearchError::NotFound(_) => 404,
            DocSearchError::PayloadTooLarge(_) => 413,
            DocSearchError::ExtractionFailure(_)
            | DocSearchError::StoreFailure(_)
            | DocSearchError::Publish(_)
            | DocSearchError::Io(_) => 500,
        }
    }

    /// Short error label paired with [`status_code`](Self::status_code).
    pub fn label(&self) -> &'static str {
        match self.status_code() {
            400 => "Bad Request",
            404 => "Not Found",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }
}

pub type Result<T, E = DocSearchError> = std::result::Result<T, E>;
