//! Core data types used throughout the indexing and search pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! Walker → FileInfo → extract_content() → Document → SearchDb
//!                                                        ↓
//!                                                   search() → SearchResult
//! ```
//!
//! A **[`FileInfo`]** is produced by the discovery walker for every file that
//! must be (re)indexed. The content extractor turns it into a **[`Document`]**,
//! whose ownership is transferred to the search index via a batch write. A
//! **[`SearchResult`]** is returned by the query side with a relevance score
//! and a snippet recovered from the file on disk.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A file selected for (re)indexing by the discovery walker.
///
/// | Field | Description |
/// |-------|-------------|
/// | `path` | Absolute path, as typed by the OS; doubles as document id and metadata key |
/// | `name` | Base name of the file |
/// | `size` | Size in bytes from the directory entry |
/// | `mod_time` | Last-modified timestamp (UTC) |
/// | `is_text` | Whether the extension is on the text allowlist; drives content extraction |
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    pub is_text: bool,
}

/// A document written to the search index.
///
/// `id` is the absolute path and is the update key: re-indexing the same
/// path replaces any prior document. `content` is empty for non-text files
/// and is indexed but never stored.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub path: String,
    pub name: String,
    pub content: String,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
}

/// A single ranked hit returned by the query side.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub path: String,
    pub name: String,
    pub score: f64,
    pub size: i64,
    pub mod_time: String,
    pub snippet: String,
}

/// The full response for one query: ranked results plus match statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: u64,
    pub max_score: f64,
    pub search_time: String,
}
