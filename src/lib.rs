//! # docsearch
//!
//! Tenant-scoped document ingestion, asynchronous text indexing, and hybrid
//! full-text search.
//!
//! An upload is stored and recorded as `UPLOADED`, then an index message is
//! published to a durable work queue. Indexing workers consume the queue,
//! extract text, and write a search index entry, moving the record through
//! `PROCESSING` to `INDEXED` or `FAILED`. Search reads the index only, and
//! every query is scoped to exactly one tenant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │  Intake  │──▶│ Metadata │   │ Work Queue │──▶│  Worker  │
//! │ CLI/HTTP │──────────────────▶│  (SQLite)  │   │ extract  │
//! └──────────┘   └──────────┘   └────────────┘   └────┬─────┘
//!                     ▲                               │
//!                     └───────── status ──────────────┤
//!                                                     ▼
//!                ┌──────────┐                   ┌──────────┐
//!                │  Search  │◀──────────────────│  Index   │
//!                │ CLI/HTTP │                   │  (FTS5)  │
//!                └──────────┘                   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Wiring of collaborators |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Text extraction from PDF, OOXML, and text files |
//! | [`ingest`] | Upload validation and storage |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`provision`] | Schema creation and queue topology |
//! | [`publisher`] | Index message publishing |
//! | [`query`] | Index query expressions and field mapping |
//! | [`queue`] | Durable work queue |
//! | [`search`] | Tenant-scoped search |
//! | [`server`] | HTTP API |
//! | [`store`] | Metadata store and search index |
//! | [`sweep`] | Metadata/index consistency sweep |
//! | [`worker`] | Indexing worker and queue consumer |

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod provision;
pub mod publisher;
pub mod query;
pub mod queue;
pub mod search;
pub mod server;
pub mod store;
pub mod sweep;
pub mod worker;
