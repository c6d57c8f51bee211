//! SQLite-backed [`MetadataStore`] and [`SearchIndex`].
//!
//! Tables are created by [`crate::provision::create_schema`]. Timestamps
//! are stored as Unix milliseconds. The search index keeps stored fields in
//! `index_entries` and analyzed fields in the `index_fts` FTS5 table;
//! relevance is FTS5's BM25, negated so that higher is better.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{now, DocumentRecord, DocumentStatus, NewDocument, SearchIndexEntry};
use crate::query::{analyze, Expr, Field};

use super::{IndexHit, MetadataStore, SearchIndex};

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn parse_status(raw: &str) -> Result<DocumentStatus, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

/// SQLite implementation of [`MetadataStore`] over the `documents` table.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str = "id, file_name, file_path, content_type, file_type, file_size, \
     tenant_id, status, uploaded_at, indexed_at, updated_at";

fn record_from_row(row: &SqliteRow) -> Result<DocumentRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let indexed_at: Option<i64> = row.try_get("indexed_at")?;
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        file_path: row.try_get("file_path")?,
        content_type: row.try_get("content_type")?,
        file_type: row.try_get("file_type")?,
        file_size: row.try_get("file_size")?,
        tenant_id: row.try_get("tenant_id")?,
        status: parse_status(&status)?,
        uploaded_at: from_millis(row.try_get("uploaded_at")?)?,
        indexed_at: indexed_at.map(from_millis).transpose()?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create(&self, doc: NewDocument) -> Result<DocumentRecord, StoreError> {
        let updated_at = now();
        let result = sqlx::query(
            r#"
            INSERT INTO documents (file_name, file_path, content_type, file_type, file_size,
                                   tenant_id, status, uploaded_at, indexed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&doc.file_name)
        .bind(&doc.file_path)
        .bind(&doc.content_type)
        .bind(&doc.file_type)
        .bind(doc.file_size)
        .bind(&doc.tenant_id)
        .bind(DocumentStatus::Uploaded.as_str())
        .bind(to_millis(doc.uploaded_at))
        .bind(to_millis(updated_at))
        .execute(&self.pool)
        .await?;

        Ok(DocumentRecord {
            id: result.last_insert_rowid(),
            file_name: doc.file_name,
            file_path: doc.file_path,
            content_type: doc.content_type,
            file_type: doc.file_type,
            file_size: doc.file_size,
            tenant_id: doc.tenant_id,
            status: DocumentStatus::Uploaded,
            uploaded_at: doc.uploaded_at,
            indexed_at: None,
            updated_at,
        })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&self, record: &DocumentRecord) -> Result<DocumentRecord, StoreError> {
        let updated_at = now();
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                file_name = ?, file_path = ?, content_type = ?, file_type = ?,
                file_size = ?, tenant_id = ?, status = ?, uploaded_at = ?,
                indexed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.file_name)
        .bind(&record.file_path)
        .bind(&record.content_type)
        .bind(&record.file_type)
        .bind(record.file_size)
        .bind(&record.tenant_id)
        .bind(record.status.as_str())
        .bind(to_millis(record.uploaded_at))
        .bind(record.indexed_at.map(to_millis))
        .bind(to_millis(updated_at))
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRecord(record.id));
        }

        let mut stored = record.clone();
        stored.updated_at = updated_at;
        Ok(stored)
    }

    async fn find_by_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE status = ? ORDER BY id",
            RECORD_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn touch(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE documents SET updated_at = ? WHERE id = ?")
            .bind(to_millis(now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRecord(id));
        }
        Ok(())
    }
}

/// SQLite implementation of [`SearchIndex`] over `index_entries` and
/// `index_fts`.
pub struct SqliteSearchIndex {
    pool: SqlitePool,
}

impl SqliteSearchIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "e.id, e.file_name, e.file_path, e.content_type, e.file_type, \
     e.file_size, e.tenant_id, e.content, e.status, e.uploaded_at, e.indexed_at";

fn entry_from_row(row: &SqliteRow) -> Result<SearchIndexEntry, StoreError> {
    let status: String = row.try_get("status")?;
    let indexed_at: Option<i64> = row.try_get("indexed_at")?;
    Ok(SearchIndexEntry {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        file_path: row.try_get("file_path")?,
        content_type: row.try_get("content_type")?,
        file_type: row.try_get("file_type")?,
        file_size: row.try_get("file_size")?,
        tenant_id: row.try_get("tenant_id")?,
        content: row.try_get("content")?,
        status: parse_status(&status)?,
        uploaded_at: from_millis(row.try_get("uploaded_at")?)?,
        indexed_at: indexed_at.map(from_millis).transpose()?,
    })
}

/// FTS5 query for a `Contains` leaf: a column-filtered phrase whose last
/// token is a prefix. `None` when the value has no indexable tokens.
fn fts_phrase(field: Field, value: &str) -> Option<String> {
    let tokens = analyze(value);
    if tokens.is_empty() {
        return None;
    }
    Some(format!("{} : \"{}\"*", field.column(), tokens.join(" ")))
}

/// Appends the WHERE clause for `expr` to `sql`, collecting bind values.
fn compile(expr: &Expr, sql: &mut String, binds: &mut Vec<String>) {
    match expr {
        Expr::MatchAll => sql.push('1'),
        Expr::Is { field, value } => {
            sql.push_str("e.");
            sql.push_str(field.column());
            sql.push_str(" = ?");
            binds.push(value.clone());
        }
        Expr::Contains { field, value } => match fts_phrase(*field, value) {
            Some(phrase) => {
                sql.push_str("e.id IN (SELECT entry_id FROM index_fts WHERE index_fts MATCH ?)");
                binds.push(phrase);
            }
            None => sql.push('0'),
        },
        Expr::And(parts) => compile_joined(parts, " AND ", '1', sql, binds),
        Expr::Or(parts) => compile_joined(parts, " OR ", '0', sql, binds),
    }
}

fn compile_joined(
    parts: &[Expr],
    sep: &str,
    empty: char,
    sql: &mut String,
    binds: &mut Vec<String>,
) {
    if parts.is_empty() {
        sql.push(empty);
        return;
    }
    sql.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            sql.push_str(sep);
        }
        compile(part, sql, binds);
    }
    sql.push(')');
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn save(&self, entry: &SearchIndexEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO index_entries (id, file_name, file_path, content_type, file_type,
                                       file_size, tenant_id, content, status, uploaded_at,
                                       indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_name = excluded.file_name,
                file_path = excluded.file_path,
                content_type = excluded.content_type,
                file_type = excluded.file_type,
                file_size = excluded.file_size,
                tenant_id = excluded.tenant_id,
                content = excluded.content,
                status = excluded.status,
                uploaded_at = excluded.uploaded_at,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.file_name)
        .bind(&entry.file_path)
        .bind(&entry.content_type)
        .bind(&entry.file_type)
        .bind(entry.file_size)
        .bind(&entry.tenant_id)
        .bind(&entry.content)
        .bind(entry.status.as_str())
        .bind(to_millis(entry.uploaded_at))
        .bind(entry.indexed_at.map(to_millis))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM index_fts WHERE entry_id = ?")
            .bind(&entry.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO index_fts (entry_id, file_name, content) VALUES (?, ?, ?)")
            .bind(&entry.id)
            .bind(&entry.file_name)
            .bind(&entry.content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SearchIndexEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM index_entries e WHERE e.id = ?",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn query(&self, expr: &Expr, limit: Option<usize>) -> Result<Vec<IndexHit>, StoreError> {
        expr.validate()?;
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

        let mut filter = String::new();
        let mut binds = Vec::new();
        compile(expr, &mut filter, &mut binds);

        let score_match: Vec<String> = expr
            .contains_terms()
            .into_iter()
            .filter_map(|(field, value)| fts_phrase(field, value))
            .collect();

        let rows = if score_match.is_empty() {
            let sql = format!(
                "SELECT {}, NULL AS score FROM index_entries e WHERE {} ORDER BY e.rowid LIMIT ?",
                ENTRY_COLUMNS, filter
            );
            let mut query = sqlx::query(&sql);
            for b in &binds {
                query = query.bind(b.as_str());
            }
            query.bind(limit).fetch_all(&self.pool).await?
        } else {
            let sql = format!(
                r#"
                SELECT {}, s.score AS score
                FROM index_entries e
                LEFT JOIN (
                    SELECT entry_id, -bm25(index_fts) AS score
                    FROM index_fts
                    WHERE index_fts MATCH ?
                ) s ON s.entry_id = e.id
                WHERE {}
                ORDER BY COALESCE(s.score, 0) DESC, e.rowid ASC
                LIMIT ?
                "#,
                ENTRY_COLUMNS, filter
            );
            let mut query = sqlx::query(&sql).bind(score_match.join(" OR "));
            for b in &binds {
                query = query.bind(b.as_str());
            }
            query.bind(limit).fetch_all(&self.pool).await?
        };

        let scored = expr.is_scored();
        rows.iter()
            .map(|row| {
                let score: Option<f64> = row.try_get("score")?;
                Ok(IndexHit {
                    entry: entry_from_row(row)?,
                    score: if scored { Some(score.unwrap_or(0.0)) } else { None },
                })
            })
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM index_entries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_fts WHERE entry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
