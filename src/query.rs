//! Boolean query expressions over the search index.
//!
//! The index mapping is static: every queryable field is either a
//! [`FieldKind::Text`] field (analyzed, supports `Contains`) or a
//! [`FieldKind::Keyword`] field (exact match, supports `Is`). Index
//! implementations receive an [`Expr`] and translate it into their native
//! query language; the in-memory index evaluates it directly with
//! [`Expr::matches`].
//!
//! ```text
//! tenantId == "acme" AND (fileName CONTAINS "report" OR content CONTAINS "report")
//! ```

use crate::models::SearchIndexEntry;

/// How a field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Tokenized full-text field.
    Text,
    /// Stored verbatim; compared exactly.
    Keyword,
}

/// A queryable field of a [`SearchIndexEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    FileName,
    Content,
    ContentType,
    FileType,
    TenantId,
}

/// The index mapping, applied once when the index is provisioned.
pub const INDEX_MAPPING: &[(Field, FieldKind)] = &[
    (Field::FileName, FieldKind::Text),
    (Field::Content, FieldKind::Text),
    (Field::ContentType, FieldKind::Keyword),
    (Field::FileType, FieldKind::Keyword),
    (Field::TenantId, FieldKind::Keyword),
];

impl Field {
    /// Wire name, as used in the HTTP API.
    pub fn name(&self) -> &'static str {
        match self {
            Field::FileName => "fileName",
            Field::Content => "content",
            Field::ContentType => "contentType",
            Field::FileType => "fileType",
            Field::TenantId => "tenantId",
        }
    }

    /// Column name in the SQLite index tables.
    pub fn column(&self) -> &'static str {
        match self {
            Field::FileName => "file_name",
            Field::Content => "content",
            Field::ContentType => "content_type",
            Field::FileType => "file_type",
            Field::TenantId => "tenant_id",
        }
    }

    pub fn kind(&self) -> FieldKind {
        INDEX_MAPPING
            .iter()
            .find(|(f, _)| f == self)
            .map(|(_, k)| *k)
            .unwrap_or(FieldKind::Keyword)
    }

    /// The entry's value for this field.
    pub fn value_of<'a>(&self, entry: &'a SearchIndexEntry) -> &'a str {
        match self {
            Field::FileName => &entry.file_name,
            Field::Content => &entry.content,
            Field::ContentType => &entry.content_type,
            Field::FileType => &entry.file_type,
            Field::TenantId => &entry.tenant_id,
        }
    }
}

/// A boolean query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matches every entry.
    MatchAll,
    /// Exact match on a keyword field.
    Is { field: Field, value: String },
    /// Analyzed match on a text field.
    Contains { field: Field, value: String },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Rejected query shape, such as `Contains` on a keyword field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid query: {0}")]
pub struct InvalidQuery(pub String);

impl Expr {
    pub fn is(field: Field, value: impl Into<String>) -> Self {
        Expr::Is {
            field,
            value: value.into(),
        }
    }

    pub fn contains(field: Field, value: impl Into<String>) -> Self {
        Expr::Contains {
            field,
            value: value.into(),
        }
    }

    /// Conjunction, flattening nested `And`s and dropping `MatchAll`.
    pub fn and(self, other: Expr) -> Self {
        let mut parts = Vec::new();
        for e in [self, other] {
            match e {
                Expr::MatchAll => {}
                Expr::And(inner) => parts.extend(inner),
                e => parts.push(e),
            }
        }
        match parts.len() {
            0 => Expr::MatchAll,
            1 => parts.remove(0),
            _ => Expr::And(parts),
        }
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Expr) -> Self {
        let mut parts = Vec::new();
        for e in [self, other] {
            match e {
                Expr::Or(inner) => parts.extend(inner),
                e => parts.push(e),
            }
        }
        Expr::Or(parts)
    }

    /// Checks every leaf against [`INDEX_MAPPING`].
    pub fn validate(&self) -> Result<(), InvalidQuery> {
        match self {
            Expr::MatchAll => Ok(()),
            Expr::Is { field, .. } => match field.kind() {
                FieldKind::Keyword => Ok(()),
                FieldKind::Text => Err(InvalidQuery(format!(
                    "exact match is not supported on text field {}",
                    field.name()
                ))),
            },
            Expr::Contains { field, .. } => match field.kind() {
                FieldKind::Text => Ok(()),
                FieldKind::Keyword => Err(InvalidQuery(format!(
                    "contains is not supported on keyword field {}",
                    field.name()
                ))),
            },
            Expr::And(parts) | Expr::Or(parts) => parts.iter().try_for_each(Expr::validate),
        }
    }

    /// All `Contains` leaves. A query with none is unscored.
    pub fn contains_terms(&self) -> Vec<(Field, &str)> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms<'a>(&'a self, out: &mut Vec<(Field, &'a str)>) {
        match self {
            Expr::Contains { field, value } => out.push((*field, value.as_str())),
            Expr::And(parts) | Expr::Or(parts) => {
                for p in parts {
                    p.collect_terms(out);
                }
            }
            Expr::MatchAll | Expr::Is { .. } => {}
        }
    }

    pub fn is_scored(&self) -> bool {
        !self.contains_terms().is_empty()
    }

    /// Evaluates the expression against an entry. `Contains` is a
    /// case-insensitive substring test.
    pub fn matches(&self, entry: &SearchIndexEntry) -> bool {
        match self {
            Expr::MatchAll => true,
            Expr::Is { field, value } => field.value_of(entry) == value,
            Expr::Contains { field, value } => {
                let needle = value.to_lowercase();
                !needle.is_empty() && field.value_of(entry).to_lowercase().contains(&needle)
            }
            Expr::And(parts) => parts.iter().all(|p| p.matches(entry)),
            Expr::Or(parts) => parts.iter().any(|p| p.matches(entry)),
        }
    }
}

/// Splits text into the alphanumeric tokens a `unicode61` analyzer
/// would index, lower-cased.
pub fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
