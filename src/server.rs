//! HTTP API for intake and search.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/documents` | Multipart upload (`file`, `tenantId`), returns 202 |
//! | `GET`    | `/api/search?q=&tenant=` | Hybrid search within one tenant |
//! | `GET`    | `/api/search/documents?tenant=&contentType=&fileType=` | Filtered listing |
//! | `GET`    | `/api/search/advanced?tenant=&fileName=&content=&contentType=&fileType=` | Multi-field search |
//! | `GET`    | `/api/search/documents/{id}?tenant=` | Point lookup |
//! | `DELETE` | `/api/search/documents/{id}?tenant=` | Remove from the index, returns 204 |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response has the same body:
//!
//! ```json
//! { "status": 400, "error": "Bad Request", "message": "Search query 'q' is required and cannot be empty.", "path": "/api/search" }
//! ```
//!
//! A document owned by another tenant is reported as `404`, exactly like a
//! missing one.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::Services;
use crate::error::DocSearchError;
use crate::ingest::{DocumentIntake, Upload};
use crate::models::{DocumentUploadResponse, SearchIndexEntry, SearchResponse};
use crate::search::{AdvancedQuery, DocumentFilter, SearchEngine};

/// Multipart framing allowance on top of `storage.max_file_size`.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    engine: Arc<SearchEngine>,
    intake: Arc<DocumentIntake>,
}

/// Builds the router over the given services. Exposed for in-process tests.
pub fn router(services: &Services) -> Router {
    let intake = services.intake();
    let body_limit = usize::try_from(intake.max_file_size())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let state = AppState {
        engine: Arc::new(services.search_engine()),
        intake: Arc::new(intake),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/documents",
            post(handle_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/search", get(handle_search))
        .route("/api/search/documents", get(handle_list_documents))
        .route("/api/search/advanced", get(handle_advanced_search))
        .route(
            "/api/search/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `[server].bind` until `shutdown` flips to `true`.
pub async fn run_server(services: &Services, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(services);

    println!("docsearch API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}

// ============ Error response ============

/// JSON error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
}

/// Handler error that renders as an [`ErrorResponse`].
struct ApiError {
    status: StatusCode,
    message: String,
    path: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, uri: &Uri) -> Self {
        Self {
            status,
            message: message.into(),
            path: uri.path().to_string(),
        }
    }

    fn bad_request(message: impl Into<String>, uri: &Uri) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, uri)
    }

    fn from_domain(err: DocSearchError, uri: &Uri) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(path = uri.path(), error = %err, "request failed");
        }
        Self::new(status, err.to_string(), uri)
    }

    fn from_multipart(err: MultipartError, uri: &Uri) -> Self {
        let status = err.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(status, "File size exceeds maximum allowed size", uri)
        } else {
            Self::bad_request(format!("Malformed multipart request: {}", err.body_text()), uri)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.message,
            path: self.path,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Unwraps query-string parameters, turning a rejection into a structured 400.
fn params<T>(query: Result<Query<T>, QueryRejection>, uri: &Uri) -> Result<T, ApiError> {
    query
        .map(|Query(p)| p)
        .map_err(|e| ApiError::bad_request(e.body_text(), uri))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents ============

async fn handle_upload(
    State(state): State<AppState>,
    uri: Uri,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<DocumentUploadResponse>), ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text(), &uri))?;

    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut tenant_id = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, &uri))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, &uri))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            "tenantId" => {
                tenant_id = field
                    .text()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, &uri))?;
            }
            other => tracing::debug!(field = other, "ignoring multipart field"),
        }
    }

    let (file_name, content_type, bytes) = file
        .filter(|(_, _, bytes)| !bytes.is_empty())
        .ok_or_else(|| ApiError::bad_request("File is required and cannot be empty", &uri))?;

    let receipt = state
        .intake
        .upload_document(Upload {
            bytes,
            file_name,
            content_type,
            tenant_id,
        })
        .await
        .map_err(|e| ApiError::from_domain(e, &uri))?;

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// ============ GET /api/search ============

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    tenant: Option<String>,
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    uri: Uri,
    query: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let p = params(query, &uri)?;
    let tenant = p.tenant.unwrap_or_default();
    if tenant.trim().is_empty() {
        tracing::warn!("search rejected: missing tenant");
        return Err(ApiError::bad_request(
            "Tenant ID is required. Please provide 'tenant' parameter.",
            &uri,
        ));
    }
    let q = p.q.unwrap_or_default();
    if q.trim().is_empty() {
        return Err(ApiError::bad_request(
            "Search query 'q' is required and cannot be empty.",
            &uri,
        ));
    }

    let response = state
        .engine
        .search_response(&q, &tenant, p.limit)
        .await
        .map_err(|e| ApiError::from_domain(e, &uri))?;
    Ok(Json(response))
}

// ============ GET /api/search/documents ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    tenant: Option<String>,
    content_type: Option<String>,
    file_type: Option<String>,
    limit: Option<usize>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    uri: Uri,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let p = params(query, &uri)?;
    let tenant = p.tenant.unwrap_or_default();
    let filter = DocumentFilter {
        content_type: p.content_type,
        file_type: p.file_type,
    };

    let started = Instant::now();
    let results = state
        .engine
        .list_documents(&tenant, &filter, p.limit)
        .await
        .map_err(|e| ApiError::from_domain(e, &uri))?;
    Ok(Json(SearchResponse::new(
        results,
        "",
        tenant.trim(),
        started.elapsed().as_millis() as u64,
    )))
}

// ============ GET /api/search/advanced ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvancedParams {
    tenant: Option<String>,
    file_name: Option<String>,
    content: Option<String>,
    content_type: Option<String>,
    file_type: Option<String>,
    limit: Option<usize>,
}

async fn handle_advanced_search(
    State(state): State<AppState>,
    uri: Uri,
    query: Result<Query<AdvancedParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let p = params(query, &uri)?;
    let tenant = p.tenant.unwrap_or_default();
    let echo = [p.file_name.as_deref(), p.content.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let criteria = AdvancedQuery {
        file_name: p.file_name,
        content: p.content,
        content_type: p.content_type,
        file_type: p.file_type,
    };

    let started = Instant::now();
    let results = state
        .engine
        .advanced_search(&tenant, &criteria, p.limit)
        .await
        .map_err(|e| ApiError::from_domain(e, &uri))?;
    Ok(Json(SearchResponse::new(
        results,
        &echo,
        tenant.trim(),
        started.elapsed().as_millis() as u64,
    )))
}

// ============ GET/DELETE /api/search/documents/{id} ============

#[derive(Debug, Deserialize)]
struct TenantParams {
    tenant: Option<String>,
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    uri: Uri,
    query: Result<Query<TenantParams>, QueryRejection>,
) -> Result<Json<SearchIndexEntry>, ApiError> {
    let tenant = params(query, &uri)?.tenant.unwrap_or_default();
    let entry = state
        .engine
        .get_document(&id, &tenant)
        .await
        .map_err(|e| ApiError::from_domain(e, &uri))?;
    Ok(Json(entry))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    uri: Uri,
    query: Result<Query<TenantParams>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let tenant = params(query, &uri)?.tenant.unwrap_or_default();
    state
        .engine
        .delete_document(&id, &tenant)
        .await
        .map_err(|e| ApiError::from_domain(e, &uri))?;
    Ok(StatusCode::NO_CONTENT)
}
