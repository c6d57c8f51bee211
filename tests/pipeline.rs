//! End-to-end pipeline over SQLite: intake, queue, worker, index, search.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use docsearch::app::Services;
use docsearch::config::load_config;
use docsearch::error::DocSearchError;
use docsearch::extract::{ExtractError, TextExtractor};
use docsearch::ingest::Upload;
use docsearch::models::{entry_id, DocumentStatus};
use docsearch::publisher::{IngestionPublisher, PublishError};
use docsearch::queue::{QueueError, QueueTopology, WorkQueue};
use docsearch::store::{MetadataStore, SearchIndex};
use tempfile::TempDir;

/// Long text for PDFs, a parse failure for anything named `corrupt.pdf`,
/// and the raw bytes for everything else.
struct StubExtractor;

impl TextExtractor for StubExtractor {
    fn extract(&self, path: &Path, _content_type: &str) -> Result<String, ExtractError> {
        let name = path.to_string_lossy();
        if name.ends_with("corrupt.pdf") {
            return Err(ExtractError::Pdf("invalid cross-reference table".into()));
        }
        if name.ends_with(".pdf") {
            return Ok("Quarterly revenue grew across every region. ".repeat(30)[..1200].to_string());
        }
        fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: name.to_string(),
            source,
        })
    }
}

async fn setup() -> (TempDir, Services) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let config_path = root.join("docsearch.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/data/docsearch.sqlite"

[storage]
dir = "{root}/storage"

[queue]
visibility_timeout_secs = 60
max_deliveries = 3

[worker]
concurrency = 2
stale_processing_secs = 0

[server]
bind = "127.0.0.1:0"
"#,
            root = root.display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let services = Services::open(&config)
        .await
        .unwrap()
        .with_extractor(Arc::new(StubExtractor));
    (tmp, services)
}

fn upload(name: &str, bytes: &[u8], tenant: &str) -> Upload {
    Upload {
        bytes: bytes.to_vec(),
        file_name: name.into(),
        content_type: None,
        tenant_id: tenant.into(),
    }
}

async fn drain(services: &Services) {
    Arc::new(services.consumer()).drain().await.unwrap();
}

#[tokio::test]
async fn uploaded_pdf_becomes_searchable_with_snippet() {
    let (_tmp, services) = setup().await;
    let receipt = services
        .intake()
        .upload_document(upload("report.pdf", b"%PDF-1.4", "acme"))
        .await
        .unwrap();
    assert_eq!(receipt.status, DocumentStatus::Uploaded);

    drain(&services).await;

    let record = services
        .metadata
        .find_by_id(receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DocumentStatus::Indexed);
    assert!(record.indexed_at.is_some());

    let results = services
        .search_engine()
        .search("report", "acme", None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let hit = &results[0];
    assert_eq!(hit.file_name, "report.pdf");
    assert_eq!(hit.status, DocumentStatus::Indexed);
    assert_eq!(hit.content_snippet.chars().count(), 203);
    assert!(hit.content_snippet.ends_with("..."));
    assert!(hit.score.is_some());

    // Content matches too.
    let by_content = services
        .search_engine()
        .search("revenue", "acme", None)
        .await
        .unwrap();
    assert_eq!(by_content.len(), 1);
}

#[tokio::test]
async fn redelivered_message_is_idempotent() {
    let (_tmp, services) = setup().await;
    let receipt = services
        .intake()
        .upload_document(upload("notes.txt", b"meeting notes about budgets", "acme"))
        .await
        .unwrap();
    let record = services
        .metadata
        .find_by_id(receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    services.publisher.publish(&record).await.unwrap();

    drain(&services).await;

    let results = services
        .search_engine()
        .search("budgets", "acme", None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, entry_id(receipt.document_id));
    assert_eq!(services.queue.pending_count("document.index.queue").await.unwrap(), 0);
}

#[tokio::test]
async fn corrupt_document_is_failed_and_unsearchable() {
    let (_tmp, services) = setup().await;
    let receipt = services
        .intake()
        .upload_document(upload("corrupt.pdf", b"%PDF-garbage", "acme"))
        .await
        .unwrap();

    drain(&services).await;

    let record = services
        .metadata
        .find_by_id(receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    assert!(services
        .index
        .find_by_id(&entry_id(receipt.document_id))
        .await
        .unwrap()
        .is_none());
    let results = services
        .search_engine()
        .search("corrupt", "acme", None)
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(
        services.queue.dead_letter_count("document.index.queue").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let (_tmp, services) = setup().await;
    let intake = services.intake();
    let acme = intake
        .upload_document(upload("report.txt", b"acme annual report", "acme"))
        .await
        .unwrap();
    let beta = intake
        .upload_document(upload("report.txt", b"beta annual report", "beta"))
        .await
        .unwrap();

    drain(&services).await;

    let engine = services.search_engine();
    let beta_results = engine.search("report", "beta", None).await.unwrap();
    assert_eq!(beta_results.len(), 1);
    assert_eq!(beta_results[0].id, entry_id(beta.document_id));
    assert!(beta_results.iter().all(|r| r.tenant_id == "beta"));

    let err = engine
        .get_document(&entry_id(acme.document_id), "beta")
        .await
        .unwrap_err();
    assert!(matches!(err, DocSearchError::NotFound(_)));
    assert_eq!(err.status_code(), 404);

    let err = engine
        .delete_document(&entry_id(acme.document_id), "beta")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert!(engine
        .get_document(&entry_id(acme.document_id), "acme")
        .await
        .is_ok());
}

#[tokio::test]
async fn failed_reprocess_keeps_previous_entry() {
    let (_tmp, services) = setup().await;
    let receipt = services
        .intake()
        .upload_document(upload("plan.txt", b"launch plan", "acme"))
        .await
        .unwrap();
    drain(&services).await;

    let record = services
        .metadata
        .find_by_id(receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    fs::remove_file(&record.file_path).unwrap();
    services.publisher.publish(&record).await.unwrap();
    drain(&services).await;

    let record = services
        .metadata
        .find_by_id(receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    // The entry from the first successful run is not removed.
    let results = services
        .search_engine()
        .search("launch", "acme", None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DocumentStatus::Indexed);
}

#[tokio::test]
async fn sweep_restores_missing_index_entry() {
    let (_tmp, services) = setup().await;
    let receipt = services
        .intake()
        .upload_document(upload("memo.txt", b"holiday memo", "acme"))
        .await
        .unwrap();
    drain(&services).await;

    let id = entry_id(receipt.document_id);
    assert!(services.index.delete(&id).await.unwrap());

    let report = services.sweep().run().await.unwrap();
    assert_eq!(report.indexed_without_entry, 1);

    drain(&services).await;
    assert!(services.index.find_by_id(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn sweep_republishes_uploaded_records_left_behind() {
    let (_tmp, services) = setup().await;
    let receipt = services
        .intake()
        .upload_document(upload("draft.txt", b"first draft", "acme"))
        .await
        .unwrap();
    // Simulate a lost message.
    let delivery = services
        .queue
        .receive("document.index.queue")
        .await
        .unwrap()
        .unwrap();
    services.queue.ack(&delivery).await.unwrap();

    let report = services.sweep().run().await.unwrap();
    assert_eq!(report.stale_uploaded, 1);

    drain(&services).await;
    let record = services
        .metadata
        .find_by_id(receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DocumentStatus::Indexed);
}

#[tokio::test]
async fn publishing_to_an_undeclared_exchange_fails() {
    let (_tmp, services) = setup().await;
    let topology = QueueTopology {
        exchange: "nowhere.exchange".into(),
        ..services.topology.clone()
    };
    let publisher = IngestionPublisher::new(Arc::clone(&services.queue), &topology);
    let record = services
        .metadata
        .create(docsearch::models::NewDocument {
            file_name: "a.txt".into(),
            file_path: "/nonexistent/a.txt".into(),
            content_type: "text/plain".into(),
            file_type: "txt".into(),
            file_size: 1,
            tenant_id: "acme".into(),
            uploaded_at: docsearch::models::now(),
        })
        .await
        .unwrap();

    let err = publisher.publish(&record).await.unwrap_err();
    assert!(matches!(
        err,
        PublishError::Queue(QueueError::Unroutable { .. })
    ));
}

#[tokio::test]
async fn concurrent_uploads_are_all_queued() {
    let (_tmp, services) = setup().await;
    let intake = Arc::new(services.intake());

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..50 {
        let intake = Arc::clone(&intake);
        tasks.spawn(async move {
            intake
                .upload_document(upload(&format!("doc{}.txt", n), b"quarterly numbers", "acme"))
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    assert_eq!(
        services.queue.pending_count("document.index.queue").await.unwrap(),
        50
    );
    drain(&services).await;
    let indexed = services
        .metadata
        .find_by_status(DocumentStatus::Indexed)
        .await
        .unwrap();
    assert_eq!(indexed.len(), 50);
}
