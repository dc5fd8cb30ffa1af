//! # Trawl
//!
//! **A local, on-disk filesystem content search service.**
//!
//! Trawl points at a directory tree, walks it, extracts textual content
//! from each file, maintains a persistent full-text index, and answers
//! ranked queries over filenames, paths, and file contents. Indexing is
//! incremental and asynchronous: clients submit a build request, receive a
//! request id immediately, and poll for progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐
//! │  Walker  │──▶│ Extract+Index │──▶│  Tantivy    │
//! │ (diffed) │   │  worker pool  │   │  FTI (disk) │
//! └────┬─────┘   └──────┬────────┘   └─────────────┘
//!      │                │
//!      │         ┌──────▼────────┐   ┌─────────────┐
//!      └────────▶│   metadata    │──▶│  SQLite KV  │
//!                │    writer     │   │ files/reqs  │
//!                └───────────────┘   └─────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **build coordinator** ([`indexer`]) accepts one build at a time
//!    through a non-blocking rendezvous handoff; concurrent attempts fail
//!    fast.
//! 2. The **discovery walker** ([`walker`]) finds files that are new or
//!    modified since their recorded `last_indexed` time, honoring hidden
//!    and excluded-path rules.
//! 3. Vanished files are reconciled out of both stores, then the **content
//!    extractor** ([`extract`]) and the full-text index ([`searchdb`]) run
//!    across a pool of up to fifty workers in batches of one hundred.
//! 4. A single **metadata writer** commits `last_indexed` for each
//!    successfully indexed file and interpolates the request's progress
//!    status, which callers poll until it reaches complete (or failed).
//! 5. The **query side** ([`searchdb`]) answers boosted multi-field
//!    searches with file-backed snippets.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `FileInfo`, `Document`, `SearchResult` |
//! | [`error`] | Typed error kinds shared across the engine |
//! | [`kvstore`] | Namespaced durable key-value metadata store (SQLite) |
//! | [`searchdb`] | Full-text index adapter and query side (Tantivy) |
//! | [`walker`] | Discovery walker with incremental diffing |
//! | [`extract`] | Bounded per-file content extraction |
//! | [`indexer`] | Build coordinator, worker pool, progress lifecycle |
//! | [`server`] | HTTP API (Axum): build, status, search, health |

pub mod config;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod kvstore;
pub mod models;
pub mod searchdb;
pub mod server;
pub mod walker;
