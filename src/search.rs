//! Tenant-scoped search over the index.
//!
//! Every operation takes a mandatory tenant id and ANDs it into the index
//! query; there is no cross-tenant mode. A non-empty query is *hybrid*: it
//! matches the file name OR the content, and results come back in the
//! index's native relevance order with a score. An empty query lists the
//! tenant's documents unscored.
//!
//! Snippets are the first `search.snippet_length` characters of the content
//! (plus `"..."` when truncated), independent of where the match occurred.

use std::sync::Arc;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::error::{DocSearchError, Result};
use crate::models::{SearchIndexEntry, SearchResponse, SearchResult};
use crate::query::{Expr, Field};
use crate::store::{IndexHit, SearchIndex};

/// Optional exact-match filters for listings.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub content_type: Option<String>,
    pub file_type: Option<String>,
}

/// Per-field criteria, ANDed together. Text fields use `Contains`,
/// keyword fields exact match. Blank values are ignored.
#[derive(Debug, Clone, Default)]
pub struct AdvancedQuery {
    pub file_name: Option<String>,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub file_type: Option<String>,
}

pub struct SearchEngine {
    index: Arc<dyn SearchIndex>,
    config: SearchConfig,
}

/// Truncates `content` to `max_chars` characters, appending `"..."` if
/// anything was cut.
pub fn snippet(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SearchEngine {
    pub fn new(index: Arc<dyn SearchIndex>, config: SearchConfig) -> Self {
        Self { index, config }
    }

    /// Hybrid search within one tenant. Blank `query` lists every document
    /// of the tenant; without `max_results` that listing is not capped.
    pub async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let tenant = require_tenant(tenant_id)?;
        self.check_length(query)?;

        let query = query.trim();
        if query.is_empty() {
            let expr = Expr::is(Field::TenantId, tenant);
            return self.run(&expr, self.listing_limit(max_results), tenant).await;
        }
        let expr = Expr::is(Field::TenantId, tenant).and(
            Expr::contains(Field::FileName, query).or(Expr::contains(Field::Content, query)),
        );
        self.run(&expr, Some(self.limit(max_results)), tenant).await
    }

    /// Search wrapped in the response envelope, with timing.
    pub async fn search_response(
        &self,
        query: &str,
        tenant_id: &str,
        max_results: Option<usize>,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let results = self.search(query, tenant_id, max_results).await?;
        Ok(SearchResponse::new(
            results,
            query,
            tenant_id.trim(),
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Unscored listing of a tenant's documents with optional exact filters.
    /// Uncapped unless `max_results` is given.
    pub async fn list_documents(
        &self,
        tenant_id: &str,
        filter: &DocumentFilter,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let tenant = require_tenant(tenant_id)?;
        let mut expr = Expr::is(Field::TenantId, tenant);
        if let Some(ct) = non_blank(&filter.content_type) {
            expr = expr.and(Expr::is(Field::ContentType, ct));
        }
        if let Some(ft) = non_blank(&filter.file_type) {
            expr = expr.and(Expr::is(Field::FileType, ft.to_lowercase()));
        }
        self.run(&expr, self.listing_limit(max_results), tenant).await
    }

    pub async fn advanced_search(
        &self,
        tenant_id: &str,
        criteria: &AdvancedQuery,
        max_results: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let tenant = require_tenant(tenant_id)?;
        let mut expr = Expr::is(Field::TenantId, tenant);
        if let Some(name) = non_blank(&criteria.file_name) {
            self.check_length(name)?;
            expr = expr.and(Expr::contains(Field::FileName, name));
        }
        if let Some(content) = non_blank(&criteria.content) {
            self.check_length(content)?;
            expr = expr.and(Expr::contains(Field::Content, content));
        }
        if let Some(ct) = non_blank(&criteria.content_type) {
            expr = expr.and(Expr::is(Field::ContentType, ct));
        }
        if let Some(ft) = non_blank(&criteria.file_type) {
            expr = expr.and(Expr::is(Field::FileType, ft.to_lowercase()));
        }
        self.run(&expr, Some(self.limit(max_results)), tenant).await
    }

    /// Point lookup. A document owned by another tenant is reported exactly
    /// like an absent one.
    pub async fn get_document(&self, id: &str, tenant_id: &str) -> Result<SearchIndexEntry> {
        let tenant = require_tenant(tenant_id)?;
        match self.index.find_by_id(id).await? {
            Some(entry) if entry.tenant_id == tenant => Ok(entry),
            Some(_) => {
                tracing::warn!(id, tenant, "cross-tenant lookup refused");
                Err(not_found(id))
            }
            None => Err(not_found(id)),
        }
    }

    /// Removes a document from the index after the same tenant check as
    /// [`get_document`](Self::get_document).
    pub async fn delete_document(&self, id: &str, tenant_id: &str) -> Result<()> {
        let entry = self.get_document(id, tenant_id).await?;
        if !self.index.delete(&entry.id).await? {
            return Err(not_found(id));
        }
        tracing::info!(id, tenant = %entry.tenant_id, "document removed from index");
        Ok(())
    }

    async fn run(
        &self,
        expr: &Expr,
        limit: Option<usize>,
        tenant: &str,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let hits = self.index.query(expr, limit).await?;
        tracing::debug!(
            tenant,
            hits = hits.len(),
            scored = expr.is_scored(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index query"
        );
        Ok(hits.into_iter().map(|hit| self.to_result(hit)).collect())
    }

    fn to_result(&self, hit: IndexHit) -> SearchResult {
        let IndexHit { entry, score } = hit;
        SearchResult {
            content_snippet: snippet(&entry.content, self.config.snippet_length),
            id: entry.id,
            file_name: entry.file_name,
            content_type: entry.content_type,
            file_type: entry.file_type,
            file_size: entry.file_size,
            uploaded_at: entry.uploaded_at,
            indexed_at: entry.indexed_at,
            status: entry.status,
            file_path: entry.file_path,
            tenant_id: entry.tenant_id,
            score,
        }
    }

    fn limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_max_results)
            .clamp(1, self.config.max_results_limit)
    }

    /// Listings return everything unless the caller asks for a page size.
    fn listing_limit(&self, requested: Option<usize>) -> Option<usize> {
        requested.map(|n| n.clamp(1, self.config.max_results_limit))
    }

    fn check_length(&self, query: &str) -> Result<()> {
        if query.chars().count() > self.config.max_query_length {
            return Err(DocSearchError::validation(format!(
                "Search query is too long. Maximum allowed length is {} characters.",
                self.config.max_query_length
            )));
        }
        Ok(())
    }
}

fn require_tenant(tenant_id: &str) -> Result<&str> {
    let tenant = tenant_id.trim();
    if tenant.is_empty() {
        return Err(DocSearchError::validation(
            "Tenant ID is required. Please provide 'tenant' parameter.",
        ));
    }
    Ok(tenant)
}

fn not_found(id: &str) -> DocSearchError {
    DocSearchError::not_found(format!("Document not found with ID: {}", id))
}

/// Prints search results to stdout.
pub async fn run_search(
    engine: &SearchEngine,
    query: &str,
    tenant_id: &str,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let response = engine.search_response(query, tenant_id, limit).await?;

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        let score = result
            .score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. [{}] {} (id: {}, {}, {} bytes)",
            i + 1,
            score,
            result.file_name,
            result.id,
            result.status,
            result.file_size
        );
        println!("    {}", result.content_snippet.replace('\n', " "));
    }
    println!();
    println!("{} ({} ms)", response.message, response.search_time_ms);

    Ok(())
}

/// Prints one document, including its full extracted content.
pub async fn run_get(engine: &SearchEngine, id: &str, tenant_id: &str) -> anyhow::Result<()> {
    let entry = engine.get_document(id, tenant_id).await?;

    println!("--- Document ---");
    println!("id:           {}", entry.id);
    println!("tenant:       {}", entry.tenant_id);
    println!("file_name:    {}", entry.file_name);
    println!("file_path:    {}", entry.file_path);
    println!("content_type: {}", entry.content_type);
    println!("file_size:    {}", entry.file_size);
    println!("status:       {}", entry.status);
    println!("uploaded_at:  {}", entry.uploaded_at.to_rfc3339());
    if let Some(indexed_at) = entry.indexed_at {
        println!("indexed_at:   {}", indexed_at.to_rfc3339());
    }
    println!();
    println!("--- Content ---");
    println!("{}", entry.content);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{entry_id, now, DocumentStatus};
    use crate::store::memory::InMemorySearchIndex;

    fn entry(id: i64, tenant: &str, name: &str, content: &str) -> SearchIndexEntry {
        SearchIndexEntry {
            id: entry_id(id),
            file_name: name.into(),
            file_path: format!("/storage/{}", name),
            content_type: if name.ends_with(".pdf") {
                "application/pdf".into()
            } else {
                "text/plain".into()
            },
            file_type: name.rsplit('.').next().unwrap_or("unknown").to_string(),
            file_size: content.len() as i64,
            tenant_id: tenant.into(),
            content: content.into(),
            status: DocumentStatus::Indexed,
            uploaded_at: now(),
            indexed_at: Some(now()),
        }
    }

    async fn engine(entries: Vec<SearchIndexEntry>) -> SearchEngine {
        let index = Arc::new(InMemorySearchIndex::new());
        for e in &entries {
            index.save(e).await.unwrap();
        }
        SearchEngine::new(index, SearchConfig::default())
    }

    #[test]
    fn snippet_law() {
        assert_eq!(snippet("short", 200), "short");
        let exact = "a".repeat(200);
        assert_eq!(snippet(&exact, 200), exact);
        let long = "b".repeat(1200);
        let s = snippet(&long, 200);
        assert_eq!(s.chars().count(), 203);
        assert!(s.ends_with("..."));
        assert_eq!(&s[..200], &long[..200]);
    }

    #[test]
    fn snippet_never_splits_multibyte_chars() {
        let text = "é".repeat(250);
        let s = snippet(&text, 200);
        assert_eq!(s.chars().count(), 203);
        assert!(s.starts_with("éé"));
    }

    #[tokio::test]
    async fn blank_tenant_is_rejected() {
        let engine = engine(vec![]).await;
        let err = engine.search("report", "  ", None).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("Tenant ID is required"));
    }

    #[tokio::test]
    async fn overlong_query_is_rejected() {
        let engine = engine(vec![]).await;
        let q = "x".repeat(501);
        let err = engine.search(&q, "acme", None).await.unwrap_err();
        assert!(matches!(err, DocSearchError::ClientValidation(_)));
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let engine = engine(vec![
            entry(1, "acme", "report.pdf", "confidential"),
            entry(2, "beta", "report.pdf", "confidential"),
        ])
        .await;
        let results = engine.search("confidential", "acme", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.tenant_id == "acme"));
    }

    #[tokio::test]
    async fn empty_query_lists_all_tenant_docs_unscored() {
        let engine = engine(vec![
            entry(1, "acme", "a.txt", "one"),
            entry(2, "acme", "b.txt", "two"),
            entry(3, "beta", "c.txt", "three"),
        ])
        .await;
        let results = engine.search("   ", "acme", None).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(results.iter().all(|r| r.score.is_none()));
    }

    #[tokio::test]
    async fn hybrid_query_matches_filename_or_content_with_scores() {
        let engine = engine(vec![
            entry(1, "acme", "report.pdf", "nothing relevant"),
            entry(2, "acme", "notes.txt", "the report and another report"),
            entry(3, "acme", "misc.txt", "unrelated"),
        ])
        .await;
        let results = engine.search("report", "acme", None).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert!(results.iter().all(|r| r.score.is_some()));
    }

    #[tokio::test]
    async fn max_results_is_clamped() {
        let entries = (1..=5).map(|i| entry(i, "acme", "a.txt", "x")).collect();
        let engine = engine(entries).await;
        assert_eq!(engine.search("", "acme", Some(2)).await.unwrap().len(), 2);
        assert_eq!(engine.search("", "acme", Some(0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_query_listing_is_not_capped_by_default_page_size() {
        let total = SearchConfig::default().default_max_results + 50;
        let mut entries: Vec<_> = (1..=total as i64)
            .map(|i| entry(i, "acme", "a.txt", "x"))
            .collect();
        entries.push(entry(9999, "beta", "b.txt", "x"));
        let engine = engine(entries).await;

        assert_eq!(engine.search("", "acme", None).await.unwrap().len(), total);
        let listed = engine
            .list_documents("acme", &DocumentFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(listed.len(), total);
        assert_eq!(engine.search("", "acme", Some(10)).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn scored_search_keeps_default_page_size() {
        let default = SearchConfig::default().default_max_results;
        let entries = (1..=(default + 20) as i64)
            .map(|i| entry(i, "acme", "a.txt", "report"))
            .collect();
        let engine = engine(entries).await;
        assert_eq!(engine.search("report", "acme", None).await.unwrap().len(), default);
    }

    #[tokio::test]
    async fn list_documents_applies_exact_filters() {
        let engine = engine(vec![
            entry(1, "acme", "a.pdf", "x"),
            entry(2, "acme", "b.txt", "y"),
        ])
        .await;
        let filter = DocumentFilter {
            file_type: Some("PDF".into()),
            ..Default::default()
        };
        let results = engine.list_documents("acme", &filter, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_name, "a.pdf");
    }

    #[tokio::test]
    async fn advanced_search_ands_criteria() {
        let engine = engine(vec![
            entry(1, "acme", "budget.pdf", "annual budget"),
            entry(2, "acme", "budget.txt", "annual budget"),
            entry(3, "acme", "plan.pdf", "annual plan"),
        ])
        .await;
        let criteria = AdvancedQuery {
            content: Some("annual".into()),
            file_name: Some("budget".into()),
            content_type: Some("application/pdf".into()),
            file_type: None,
        };
        let results = engine.advanced_search("acme", &criteria, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "1");
    }

    #[tokio::test]
    async fn foreign_tenant_lookup_is_not_found() {
        let engine = engine(vec![entry(7, "acme", "a.txt", "x")]).await;
        assert!(engine.get_document("7", "acme").await.is_ok());
        let err = engine.get_document("7", "beta").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        let absent = engine.get_document("8", "beta").await.unwrap_err();
        assert_eq!(absent.to_string(), "Document not found with ID: 8");
        assert_eq!(err.to_string(), "Document not found with ID: 7");
    }

    #[tokio::test]
    async fn delete_is_tenant_checked() {
        let engine = engine(vec![entry(7, "acme", "a.txt", "x")]).await;
        assert!(engine.delete_document("7", "beta").await.is_err());
        engine.delete_document("7", "acme").await.unwrap();
        assert!(engine.get_document("7", "acme").await.is_err());
    }
}
