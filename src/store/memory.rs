//! In-memory [`MetadataStore`] and [`SearchIndex`] implementations.
//!
//! Backed by `BTreeMap`/`Vec` behind `std::sync::RwLock`. Both support
//! fault injection so tests can exercise the worker's failure paths.
//! The index scores a match by counting case-insensitive occurrences of
//! each `Contains` term in its field.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{now, DocumentRecord, DocumentStatus, NewDocument, SearchIndexEntry};
use crate::query::Expr;

use super::{IndexHit, MetadataStore, SearchIndex};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".into()))
}

/// In-memory metadata store.
pub struct InMemoryMetadataStore {
    records: RwLock<BTreeMap<i64, DocumentRecord>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
    reject_status: RwLock<Option<DocumentStatus>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
            reject_status: RwLock::new(None),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `save` fail for records carrying `status`.
    pub fn reject_saves_with(&self, status: Option<DocumentStatus>) {
        if let Ok(mut guard) = self.reject_status.write() {
            *guard = status;
        }
    }

    /// Moves a record's `updated_at` into the past.
    #[cfg(test)]
    pub(crate) fn age(&self, id: i64, by: chrono::Duration) {
        if let Ok(mut records) = self.records.write() {
            if let Some(record) = records.get_mut(&id) {
                record.updated_at -= by;
            }
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("metadata store offline".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create(&self, doc: NewDocument) -> Result<DocumentRecord, StoreError> {
        self.check()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = DocumentRecord {
            id,
            file_name: doc.file_name,
            file_path: doc.file_path,
            content_type: doc.content_type,
            file_type: doc.file_type,
            file_size: doc.file_size,
            tenant_id: doc.tenant_id,
            status: DocumentStatus::Uploaded,
            uploaded_at: doc.uploaded_at,
            indexed_at: None,
            updated_at: now(),
        };
        write(&self.records)?.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError> {
        self.check()?;
        Ok(read(&self.records)?.get(&id).cloned())
    }

    async fn save(&self, record: &DocumentRecord) -> Result<DocumentRecord, StoreError> {
        self.check()?;
        if *read(&self.reject_status)? == Some(record.status) {
            return Err(StoreError::Unavailable(format!(
                "refusing to persist status {}",
                record.status
            )));
        }
        let mut records = write(&self.records)?;
        let slot = records
            .get_mut(&record.id)
            .ok_or(StoreError::MissingRecord(record.id))?;
        let mut stored = record.clone();
        stored.updated_at = now();
        *slot = stored.clone();
        Ok(stored)
    }

    async fn find_by_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        self.check()?;
        Ok(read(&self.records)?
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn touch(&self, id: i64) -> Result<(), StoreError> {
        self.check()?;
        let mut records = write(&self.records)?;
        let record = records.get_mut(&id).ok_or(StoreError::MissingRecord(id))?;
        record.updated_at = now();
        Ok(())
    }
}

/// In-memory search index. Entries keep their first-insertion position.
pub struct InMemorySearchIndex {
    entries: RwLock<Vec<SearchIndexEntry>>,
    unavailable: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("search index offline".into()));
        }
        Ok(())
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn occurrences(haystack: &str, needle: &str) -> usize {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return 0;
    }
    haystack.to_lowercase().matches(needle.as_str()).count()
}

fn score(expr: &Expr, entry: &SearchIndexEntry) -> f64 {
    expr.contains_terms()
        .iter()
        .map(|(field, term)| occurrences(field.value_of(entry), term) as f64)
        .sum()
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn save(&self, entry: &SearchIndexEntry) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = write(&self.entries)?;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SearchIndexEntry>, StoreError> {
        self.check()?;
        Ok(read(&self.entries)?.iter().find(|e| e.id == id).cloned())
    }

    async fn query(&self, expr: &Expr, limit: Option<usize>) -> Result<Vec<IndexHit>, StoreError> {
        self.check()?;
        expr.validate()?;
        let scored = expr.is_scored();
        let mut hits: Vec<IndexHit> = read(&self.entries)?
            .iter()
            .filter(|e| expr.matches(e))
            .map(|e| IndexHit {
                score: scored.then(|| score(expr, e)),
                entry: e.clone(),
            })
            .collect();
        if scored {
            // stable sort keeps insertion order among equal scores
            hits.sort_by(|a, b| {
                b.score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = write(&self.entries)?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }
}
