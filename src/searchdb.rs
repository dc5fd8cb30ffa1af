//! Full-text document index built on Tantivy.
//!
//! Owns the on-disk schema for indexed files and the write/read handles.
//! Document identity is the absolute path: upserting a path replaces any
//! prior document with the same path. Writes are batched for throughput.
//!
//! Field mapping:
//!
//! | Field | Analyzer | Stored |
//! |-------|----------|--------|
//! | `path` | raw (exact match) | yes |
//! | `name` | default tokenizer | yes |
//! | `content` | default tokenizer | no |
//! | `size` | numeric | yes |
//! | `mod_time` | none (RFC 3339 string) | yes |
//!
//! `content` is indexed but not stored, so query-side snippets are recovered
//! by re-reading the matched file from disk.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, INDEXED, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::extract::MAX_CONTENT_EXTRACTION_SIZE;
use crate::models::{Document, SearchResponse, SearchResult};
use crate::walker::is_text_file;

/// Documents per index write (both upsert and delete).
pub const INDEXING_BATCH_SIZE: usize = 100;

/// Bytes of context kept on each side of a snippet match.
const SNIPPET_CONTEXT: usize = 100;

const WRITER_HEAP_BYTES: usize = 50_000_000;

const BOOST_FOR_CONTENT: f32 = 3.0;
const BOOST_FOR_FILE_NAME: f32 = 2.0;
const BOOST_FOR_PATH: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
struct Fields {
    path: Field,
    name: Field,
    content: Field,
    size: Field,
    mod_time: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();

    let path = builder.add_text_field("path", STRING | STORED);
    let name = builder.add_text_field("name", TEXT | STORED);
    // Indexed for search, but the raw text is not retrievable from the index.
    let content = builder.add_text_field("content", TEXT);
    let size = builder.add_i64_field("size", INDEXED | STORED);
    let mod_time = builder.add_text_field("mod_time", STORED);

    let fields = Fields {
        path,
        name,
        content,
        size,
        mod_time,
    };

    (builder.build(), fields)
}

pub struct SearchDb {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: Fields,
}

impl SearchDb {
    /// Opens the index directory, creating it (and the schema) if absent.
    pub fn open(config: &Config) -> Result<Self> {
        let index_path = config.index_dir();
        std::fs::create_dir_all(&index_path)?;

        let (schema, fields) = build_schema();
        let directory =
            MmapDirectory::open(&index_path).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, schema)?;

        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
        })
    }

    /// Writes a batch of documents, replacing any prior document with the
    /// same path. Commits every [`INDEXING_BATCH_SIZE`] documents.
    pub fn upsert_documents(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        for (i, doc) in documents.iter().enumerate() {
            writer.delete_term(Term::from_field_text(self.fields.path, &doc.path));

            let mut indexed = TantivyDocument::default();
            indexed.add_text(self.fields.path, &doc.path);
            indexed.add_text(self.fields.name, &doc.name);
            indexed.add_text(self.fields.content, &doc.content);
            indexed.add_i64(self.fields.size, doc.size);
            let mod_time = doc.mod_time.to_rfc3339();
            indexed.add_text(self.fields.mod_time, &mod_time);
            writer.add_document(indexed)?;

            if (i + 1) % INDEXING_BATCH_SIZE == 0 {
                writer.commit()?;
                debug!(
                    documents_indexed = i + 1,
                    total = documents.len(),
                    "committed batch of documents"
                );
            }
        }

        if documents.len() % INDEXING_BATCH_SIZE != 0 {
            writer.commit()?;
        }

        Ok(())
    }

    /// Deletes documents by id (absolute path), in batches.
    pub fn delete_documents(&self, document_ids: &[String]) -> Result<()> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        for (i, id) in document_ids.iter().enumerate() {
            writer.delete_term(Term::from_field_text(self.fields.path, id));

            if (i + 1) % INDEXING_BATCH_SIZE == 0 {
                writer.commit()?;
            }
        }

        if document_ids.len() % INDEXING_BATCH_SIZE != 0 {
            writer.commit()?;
        }

        Ok(())
    }

    /// Number of live documents in the index.
    pub fn doc_count(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    /// Ranked search over content, name, and path.
    ///
    /// Double-quoted phrases in the query are matched as phrases. An empty
    /// or whitespace-only query returns an empty response without touching
    /// the index.
    pub fn search(&self, query_string: &str, limit: usize, offset: usize) -> Result<SearchResponse> {
        let start = Instant::now();

        if query_string.trim().is_empty() || limit == 0 {
            return Ok(SearchResponse::default());
        }

        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.content, self.fields.name, self.fields.path],
        );
        parser.set_field_boost(self.fields.content, BOOST_FOR_CONTENT);
        parser.set_field_boost(self.fields.name, BOOST_FOR_FILE_NAME);
        parser.set_field_boost(self.fields.path, BOOST_FOR_PATH);

        let (query, _lenient_errors) = parser.parse_query_lenient(&query_string.to_lowercase());

        let (total, top_docs) =
            searcher.search(&query, &(Count, TopDocs::with_limit(limit).and_offset(offset)))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;

            let path = doc
                .get_first(self.fields.path)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let name = doc
                .get_first(self.fields.name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let size = doc
                .get_first(self.fields.size)
                .and_then(|v| v.as_i64())
                .unwrap_or_default();
            let mod_time = doc
                .get_first(self.fields.mod_time)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let snippet = extract_snippet(&path, query_string);

            results.push(SearchResult {
                id: path.clone(),
                path,
                name,
                score: score as f64,
                size,
                mod_time,
                snippet,
            });
        }

        let max_score = results.first().map(|r| r.score).unwrap_or(0.0);

        Ok(SearchResponse {
            results,
            total: total as u64,
            max_score,
            search_time: format!("{:?}", start.elapsed()),
        })
    }

    /// Flushes any pending writes. Called on shutdown.
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.commit()?;
        Ok(())
    }
}

/// Recovers a snippet for a hit by re-reading the file, since `content` is
/// not stored in the index. Returns an empty string for non-text files or
/// when no query term occurs in the readable portion.
fn extract_snippet(path: &str, query_string: &str) -> String {
    if !is_text_file(path) {
        return String::new();
    }

    let content = match read_capped(Path::new(path)) {
        Ok(content) => content,
        Err(err) => {
            warn!(path, err = %err, "failed to read file for snippet");
            return String::new();
        }
    };

    let haystack = content.to_lowercase();
    let lowered = query_string.to_lowercase();
    for term in lowered.split(['"', ' ', '\t', '\n']).filter(|t| !t.is_empty()) {
        if let Some(pos) = haystack.find(term) {
            return slice_snippet(&content, pos.min(content.len()), term.len());
        }
    }

    String::new()
}

fn read_capped(path: &Path) -> std::io::Result<String> {
    use std::io::Read;

    let file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.take(MAX_CONTENT_EXTRACTION_SIZE).read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn slice_snippet(content: &str, match_start: usize, match_len: usize) -> String {
    let mut start = match_start.saturating_sub(SNIPPET_CONTEXT);
    let mut end = match_start
        .saturating_add(match_len)
        .saturating_add(SNIPPET_CONTEXT)
        .min(content.len());

    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }

    let mut snippet = content[start..end].trim().to_string();
    if start > 0 {
        snippet = format!("...{}", snippet);
    }
    if end < content.len() {
        snippet.push_str("...");
    }

    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(path: &str, content: &str) -> Document {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Document {
            id: path.to_string(),
            path: path.to_string(),
            name,
            content: content.to_string(),
            size: content.len() as i64,
            mod_time: Utc::now(),
        }
    }

    fn open_db(dir: &tempfile::TempDir) -> SearchDb {
        let config = Config::with_storage_root(dir.path());
        SearchDb::open(&config).unwrap()
    }

    #[test]
    fn upsert_replaces_document_with_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.upsert_documents(&[document("/tmp/a.txt", "first revision")])
            .unwrap();
        db.upsert_documents(&[document("/tmp/a.txt", "second revision")])
            .unwrap();

        assert_eq!(db.doc_count().unwrap(), 1);

        let response = db.search("revision", 10, 0).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "/tmp/a.txt");
    }

    #[test]
    fn delete_removes_documents_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.upsert_documents(&[
            document("/tmp/a.txt", "alpha"),
            document("/tmp/b.txt", "beta"),
        ])
        .unwrap();
        assert_eq!(db.doc_count().unwrap(), 2);

        db.delete_documents(&["/tmp/a.txt".to_string()]).unwrap();
        assert_eq!(db.doc_count().unwrap(), 1);
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_db(&dir);
            db.upsert_documents(&[document("/tmp/a.txt", "persistent content")])
                .unwrap();
            db.close().unwrap();
        }

        let reopened = open_db(&dir);
        assert_eq!(reopened.doc_count().unwrap(), 1);
        let response = reopened.search("persistent", 10, 0).unwrap();
        assert_eq!(response.results[0].id, "/tmp/a.txt");
    }

    #[test]
    fn empty_query_returns_empty_response() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.upsert_documents(&[document("/tmp/a.txt", "alpha")])
            .unwrap();

        let response = db.search("   ", 10, 0).unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.total, 0);
    }

    #[test]
    fn name_matches_rank_results() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        db.upsert_documents(&[
            document("/tmp/report.txt", "quarterly numbers"),
            document("/tmp/notes.txt", "the report mentions revenue"),
        ])
        .unwrap();

        let response = db.search("report", 10, 0).unwrap();
        assert_eq!(response.total, 2);
        assert!(response.max_score > 0.0);
    }

    #[test]
    fn snippet_slices_around_match() {
        let content = "x".repeat(300) + " needle " + &"y".repeat(300);
        let pos = content.find("needle").unwrap();
        let snippet = slice_snippet(&content, pos, "needle".len());
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("needle"));
        assert!(snippet.len() <= 2 * SNIPPET_CONTEXT + "needle".len() + 6 + 2);
    }

    #[test]
    fn snippet_keeps_short_content_whole() {
        let content = "short needle here";
        let pos = content.find("needle").unwrap();
        let snippet = slice_snippet(content, pos, "needle".len());
        assert_eq!(snippet, "short needle here");
    }
}
