//! Core data models used throughout docsearch.
//!
//! These types represent the document records, queue messages, index
//! entries, and search results that flow through the ingestion, indexing,
//! and retrieval pipeline.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current time truncated to milliseconds, the precision timestamps are
/// persisted at.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Lifecycle state of an uploaded document.
///
/// Transitions are `Uploaded → Processing → Indexed`, or
/// `Processing → Failed`. Redelivery of a queue message moves any state
/// back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "UPLOADED",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Indexed => "INDEXED",
            DocumentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOADED" => Ok(DocumentStatus::Uploaded),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "INDEXED" => Ok(DocumentStatus::Indexed),
            "FAILED" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// Input for creating a document record. The store assigns `id`,
/// and every new record starts as [`DocumentStatus::Uploaded`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub file_type: String,
    pub file_size: i64,
    pub tenant_id: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Durable lifecycle record of a document, owned by the metadata store.
///
/// Extracted text is never stored here; it lives only in the
/// [`SearchIndexEntry`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub file_type: String,
    pub file_size: i64,
    pub tenant_id: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    /// Last time the record was persisted. Used by the consistency sweep
    /// to find records stuck in a non-terminal state.
    pub updated_at: DateTime<Utc>,
}

/// Work-queue payload asking the worker to index one document.
///
/// Carries just enough to locate and describe the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMessage {
    pub document_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub file_size: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&DocumentRecord> for IndexMessage {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            document_id: record.id,
            file_name: record.file_name.clone(),
            file_path: record.file_path.clone(),
            content_type: record.content_type.clone(),
            file_size: record.file_size,
            uploaded_at: record.uploaded_at,
        }
    }
}

/// A document as stored in the search index, including its full text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    /// Always the originating `DocumentRecord.id` rendered as a string.
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub file_type: String,
    pub file_size: i64,
    pub tenant_id: String,
    pub content: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl SearchIndexEntry {
    /// Builds the index entry for a record that has just been indexed.
    pub fn from_record(record: &DocumentRecord, content: String) -> Self {
        Self {
            id: entry_id(record.id),
            file_name: record.file_name.clone(),
            file_path: record.file_path.clone(),
            content_type: record.content_type.clone(),
            file_type: record.file_type.clone(),
            file_size: record.file_size,
            tenant_id: record.tenant_id.clone(),
            content,
            status: record.status,
            uploaded_at: record.uploaded_at,
            indexed_at: record.indexed_at,
        }
    }
}

/// Index entry id for a document id. Deterministic, so reprocessing
/// overwrites rather than duplicates.
pub fn entry_id(document_id: i64) -> String {
    document_id.to_string()
}

/// A search result returned from the query engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub file_type: String,
    pub file_size: i64,
    pub content_snippet: String,
    pub uploaded_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
    pub file_path: String,
    pub tenant_id: String,
    /// Native relevance score. Absent when nothing was ranked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Envelope returned by `GET /api/search`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub query: String,
    pub tenant_id: String,
    pub message: String,
    pub search_time_ms: u64,
}

impl SearchResponse {
    pub fn new(results: Vec<SearchResult>, query: &str, tenant_id: &str, search_time_ms: u64) -> Self {
        let total_results = results.len();
        let message = if total_results > 0 {
            format!("Found {} document(s) matching your query", total_results)
        } else {
            "No documents found matching your query".to_string()
        };
        Self {
            results,
            total_results,
            query: query.to_string(),
            tenant_id: tenant_id.to_string(),
            message,
            search_time_ms,
        }
    }
}

/// Receipt returned to the uploader once the document is queued.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUploadResponse {
    pub document_id: i64,
    pub file_name: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Indexed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn index_message_uses_camel_case_wire_names() {
        let msg = IndexMessage {
            document_id: 42,
            file_name: "report.pdf".into(),
            file_path: "/data/x_report.pdf".into(),
            content_type: "application/pdf".into(),
            file_size: 1024,
            uploaded_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["documentId"], 42);
        assert_eq!(json["fileName"], "report.pdf");
        assert_eq!(json["fileSize"], 1024);
        assert!(json["uploadedAt"].is_string());
        assert!(json.get("content").is_none());
    }

    #[test]
    fn unscored_result_omits_score() {
        let result = SearchResult {
            id: "1".into(),
            file_name: "a.txt".into(),
            content_type: "text/plain".into(),
            file_type: "txt".into(),
            file_size: 3,
            content_snippet: "abc".into(),
            uploaded_at: Utc::now(),
            indexed_at: None,
            status: DocumentStatus::Indexed,
            file_path: "/tmp/a.txt".into(),
            tenant_id: "acme".into(),
            score: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("score").is_none());
        assert_eq!(json["status"], "INDEXED");
        assert_eq!(json["contentSnippet"], "abc");
    }

    #[test]
    fn search_response_message_reflects_count() {
        let empty = SearchResponse::new(Vec::new(), "q", "acme", 3);
        assert_eq!(empty.total_results, 0);
        assert_eq!(empty.message, "No documents found matching your query");
    }
}
