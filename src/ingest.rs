//! Document intake.
//!
//! Validates an upload, stores the raw bytes under `storage.dir`, creates
//! the `UPLOADED` metadata record, and hands the record to the ingestion
//! publisher. Indexing happens later, on a worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{DocSearchError, Result};
use crate::extract::guess_content_type;
use crate::models::{now, DocumentUploadResponse, NewDocument};
use crate::publisher::IngestionPublisher;
use crate::store::MetadataStore;

pub const UPLOAD_MESSAGE: &str = "Document uploaded successfully and queued for indexing";

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub tenant_id: String,
}

pub struct DocumentIntake {
    metadata: Arc<dyn MetadataStore>,
    publisher: Arc<IngestionPublisher>,
    storage: StorageConfig,
}

/// Lower-cased extension after the last dot, or `"unknown"` when there is
/// none or the dot leads or ends the name.
pub fn file_type_of(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && idx < file_name.len() - 1 => {
            file_name[idx + 1..].to_lowercase()
        }
        _ => "unknown".to_string(),
    }
}

/// Final path component of a client-supplied name, so uploads cannot
/// escape the storage directory.
fn base_name(file_name: &str) -> Option<String> {
    let normalized = file_name.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

impl DocumentIntake {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        publisher: Arc<IngestionPublisher>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            metadata,
            publisher,
            storage,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.storage.max_file_size
    }

    pub async fn upload_document(&self, upload: Upload) -> Result<DocumentUploadResponse> {
        let tenant_id = upload.tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(DocSearchError::validation(
                "Tenant ID is required. Please provide 'tenantId'.",
            ));
        }
        if upload.bytes.is_empty() {
            return Err(DocSearchError::validation("File is empty"));
        }
        let file_name = base_name(&upload.file_name)
            .ok_or_else(|| DocSearchError::validation("File name is required"))?;
        if upload.bytes.len() as u64 > self.storage.max_file_size {
            return Err(DocSearchError::PayloadTooLarge(format!(
                "File size exceeds maximum allowed size of {} bytes",
                self.storage.max_file_size
            )));
        }

        let file_path = self.store_file(&file_name, &upload.bytes).await?;
        let file_type = file_type_of(&file_name);
        let content_type = upload
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(&file_type).to_string());

        let record = self
            .metadata
            .create(NewDocument {
                file_name: file_name.clone(),
                file_path: file_path.display().to_string(),
                content_type,
                file_type,
                file_size: upload.bytes.len() as i64,
                tenant_id: tenant_id.to_string(),
                uploaded_at: now(),
            })
            .await?;

        tracing::info!(
            document_id = record.id,
            tenant = %record.tenant_id,
            file_name = %record.file_name,
            size = record.file_size,
            "document stored"
        );

        self.publisher.publish(&record).await?;

        Ok(DocumentUploadResponse {
            document_id: record.id,
            file_name: record.file_name,
            status: record.status,
            uploaded_at: record.uploaded_at,
            message: UPLOAD_MESSAGE.to_string(),
        })
    }

    async fn store_file(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.storage.dir).await?;
        let path = self
            .storage
            .dir
            .join(format!("{}_{}", Uuid::new_v4(), file_name));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Uploads a local file and prints the receipt.
pub async fn run_upload(
    intake: &DocumentIntake,
    path: &Path,
    tenant_id: &str,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let receipt = intake
        .upload_document(Upload {
            bytes,
            file_name,
            content_type,
            tenant_id: tenant_id.to_string(),
        })
        .await?;

    println!("{}", receipt.message);
    println!("  document_id: {}", receipt.document_id);
    println!("  file_name:   {}", receipt.file_name);
    println!("  status:      {}", receipt.status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, IndexMessage};
    use crate::queue::memory::InMemoryWorkQueue;
    use crate::queue::{QueueTopology, WorkQueue};
    use crate::store::memory::InMemoryMetadataStore;
    use std::time::Duration;
    use tempfile::TempDir;

    const QUEUE: &str = "document.index.queue";

    struct Harness {
        tmp: TempDir,
        metadata: Arc<InMemoryMetadataStore>,
        queue: Arc<InMemoryWorkQueue>,
        intake: DocumentIntake,
    }

    async fn harness(max_file_size: u64, declare: bool) -> Harness {
        let tmp = TempDir::new().unwrap();
        let topology = QueueTopology {
            exchange: "document.exchange".into(),
            queue: QUEUE.into(),
            routing_key: "document.index".into(),
            max_deliveries: 5,
            visibility_timeout: Duration::from_secs(60),
        };
        let queue = Arc::new(InMemoryWorkQueue::new());
        if declare {
            queue.declare(&topology).await.unwrap();
        }
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let publisher = Arc::new(IngestionPublisher::new(queue.clone(), &topology));
        let intake = DocumentIntake::new(
            metadata.clone(),
            publisher,
            StorageConfig {
                dir: tmp.path().join("storage"),
                max_file_size,
            },
        );
        Harness {
            tmp,
            metadata,
            queue,
            intake,
        }
    }

    fn upload(name: &str, bytes: &[u8], tenant: &str) -> Upload {
        Upload {
            bytes: bytes.to_vec(),
            file_name: name.into(),
            content_type: None,
            tenant_id: tenant.into(),
        }
    }

    #[test]
    fn file_type_rules() {
        assert_eq!(file_type_of("report.PDF"), "pdf");
        assert_eq!(file_type_of("archive.tar.gz"), "gz");
        assert_eq!(file_type_of(".bashrc"), "unknown");
        assert_eq!(file_type_of("trailing."), "unknown");
        assert_eq!(file_type_of("README"), "unknown");
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(base_name("C:\\docs\\a.txt").as_deref(), Some("a.txt"));
        assert_eq!(base_name("dir/"), None);
        assert_eq!(base_name(".."), None);
    }

    #[tokio::test]
    async fn upload_stores_file_creates_record_and_publishes_once() {
        let h = harness(1024, true).await;
        let receipt = h
            .intake
            .upload_document(upload("report.pdf", b"%PDF-1.4 body", "acme"))
            .await
            .unwrap();
        assert_eq!(receipt.status, DocumentStatus::Uploaded);
        assert_eq!(receipt.message, UPLOAD_MESSAGE);

        let record = h.metadata.find_by_id(receipt.document_id).await.unwrap().unwrap();
        assert_eq!(record.file_type, "pdf");
        assert_eq!(record.content_type, "application/pdf");
        assert_eq!(record.tenant_id, "acme");
        assert!(Path::new(&record.file_path).starts_with(h.tmp.path().join("storage")));
        assert!(record.file_path.ends_with("_report.pdf"));
        assert_eq!(std::fs::read(&record.file_path).unwrap(), b"%PDF-1.4 body");

        let payloads = h.queue.pending_payloads(QUEUE).await;
        assert_eq!(payloads.len(), 1);
        let msg: IndexMessage = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(msg.document_id, record.id);
    }

    #[tokio::test]
    async fn validation_failures() {
        let h = harness(8, true).await;
        let empty = h.intake.upload_document(upload("a.txt", b"", "acme")).await;
        assert_eq!(empty.unwrap_err().status_code(), 400);
        let no_tenant = h.intake.upload_document(upload("a.txt", b"x", " ")).await;
        assert_eq!(no_tenant.unwrap_err().status_code(), 400);
        let no_name = h.intake.upload_document(upload("  ", b"x", "acme")).await;
        assert_eq!(no_name.unwrap_err().status_code(), 400);
        let too_big = h
            .intake
            .upload_document(upload("a.txt", b"123456789", "acme"))
            .await;
        assert_eq!(too_big.unwrap_err().status_code(), 413);
        assert_eq!(h.queue.pending_count(QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_failure_leaves_record_uploaded() {
        let h = harness(1024, false).await;
        let err = h
            .intake
            .upload_document(upload("a.txt", b"hello", "acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocSearchError::Publish(_)));
        assert_eq!(err.status_code(), 500);

        let uploaded = h
            .metadata
            .find_by_status(DocumentStatus::Uploaded)
            .await
            .unwrap();
        assert_eq!(uploaded.len(), 1);
    }

    #[tokio::test]
    async fn explicit_content_type_wins() {
        let h = harness(1024, true).await;
        let mut u = upload("data.bin", b"abc", "acme");
        u.content_type = Some("text/plain".into());
        let receipt = h.intake.upload_document(u).await.unwrap();
        let record = h.metadata.find_by_id(receipt.document_id).await.unwrap().unwrap();
        assert_eq!(record.content_type, "text/plain");
        assert_eq!(record.file_type, "bin");
    }
}
