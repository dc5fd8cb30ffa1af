//! Discovery walker: finds files under a root that must be (re)indexed.
//!
//! Walks the tree depth-first, pruning hidden directories (except the root
//! itself) and excluded absolute paths, then diffs each surviving file
//! against the *files* namespace of the metadata store. A file is selected
//! when it has never been indexed, when its mod-time is strictly newer than
//! the recorded `last_indexed`, or when the recorded metadata cannot be
//! read or parsed (fail-open: re-indexing is cheap, missing a change is not).
//!
//! The walker never mutates the metadata store or the index.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::kvstore::{FileMetadata, MetadataStore, Namespace};
use crate::models::FileInfo;

/// Case-insensitive extension allowlist for content extraction.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "go", "js", "py", "java", "cpp", "c", "h", "html", "css", "json", "xml", "yaml",
    "yml", "ini", "conf", "csv", "tsv", "sql", "rs", "rb", "php", "sh", "toml", "log", "env",
];

pub async fn discover_modified_files(
    store: &MetadataStore,
    root_path: &str,
    exclude_folders: &[String],
) -> Result<Vec<FileInfo>> {
    let exclude_set: HashSet<&str> = exclude_folders.iter().map(String::as_str).collect();
    let root = Path::new(root_path);

    let mut modified_files = Vec::new();
    let mut walker = WalkDir::new(root).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // Permission errors skip the subtree; anything else aborts
                // the walk and fails the build.
                if is_permission_denied(&err) {
                    warn!(err = %err, "skipping unreadable directory entry");
                    continue;
                }
                error!(err = %err, "could not walk through file or directory");
                return Err(walk_error(err));
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();

        if entry.file_type().is_dir() {
            if name.starts_with('.') && entry.path() != root {
                walker.skip_current_dir();
                continue;
            }
            if exclude_set.contains(entry.path().to_string_lossy().as_ref()) {
                walker.skip_current_dir();
                continue;
            }
            continue;
        }

        if !entry.file_type().is_file() || name.starts_with('.') {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                if is_permission_denied(&err) {
                    warn!(path = %entry.path().display(), "skipping unreadable file");
                    continue;
                }
                error!(path = %entry.path().display(), err = %err, "could not stat file");
                return Err(walk_error(err));
            }
        };

        let mod_time: DateTime<Utc> = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            .into();

        let path = entry.path().to_string_lossy().into_owned();
        if should_index(store, &path, mod_time).await {
            let is_text = is_text_file(&path);
            modified_files.push(FileInfo {
                path,
                name,
                size: metadata.len() as i64,
                mod_time,
                is_text,
            });
        }
    }

    Ok(modified_files)
}

async fn should_index(store: &MetadataStore, path: &str, mod_time: DateTime<Utc>) -> bool {
    let value = match store.get(Namespace::Files, path).await {
        Ok(value) => value,
        // Never indexed before.
        Err(Error::NotFound(_)) => return true,
        Err(err) => {
            error!(path, err = %err, "failed to get file metadata");
            return true;
        }
    };

    match serde_json::from_str::<FileMetadata>(&value) {
        Ok(metadata) => mod_time > metadata.last_indexed,
        Err(err) => {
            error!(path, err = %err, "malformed file metadata");
            true
        }
    }
}

pub fn is_text_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            TEXT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn is_permission_denied(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|io| io.kind() == ErrorKind::PermissionDenied)
        .unwrap_or(false)
}

fn walk_error(err: walkdir::Error) -> Error {
    match err.into_io_error() {
        Some(io) => io.into(),
        None => std::io::Error::other("filesystem loop detected during walk").into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;

    async fn open_store(dir: &tempfile::TempDir) -> MetadataStore {
        let config = Config::with_storage_root(dir.path().join("state"));
        MetadataStore::open(&config).await.unwrap()
    }

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("subdir/nested")).unwrap();
        fs::write(root.join("file1.txt"), "alpha").unwrap();
        fs::write(root.join("file2.bin"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("subdir/file3.md"), "beta").unwrap();
        fs::write(root.join("subdir/nested/file4.py"), "gamma").unwrap();
    }

    #[test]
    fn classifies_text_extensions_case_insensitively() {
        assert!(is_text_file("/tmp/a.txt"));
        assert!(is_text_file("/tmp/a.MD"));
        assert!(is_text_file("/tmp/src/lib.rs"));
        assert!(!is_text_file("/tmp/a.bin"));
        assert!(!is_text_file("/tmp/noextension"));
    }

    #[tokio::test]
    async fn discovers_all_files_on_first_walk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let root = dir.path().join("tree");
        write_tree(&root);

        let files =
            discover_modified_files(&store, &root.to_string_lossy(), &[]).await.unwrap();

        let mut names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["file1.txt", "file2.bin", "file3.md", "file4.py"]);

        let binary = files.iter().find(|f| f.name == "file2.bin").unwrap();
        assert!(!binary.is_text);
        let text = files.iter().find(|f| f.name == "file1.txt").unwrap();
        assert!(text.is_text);
    }

    #[tokio::test]
    async fn skips_hidden_directories_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "hidden").unwrap();
        fs::write(root.join(".hidden.txt"), "hidden").unwrap();
        fs::write(root.join("visible.txt"), "visible").unwrap();

        let files =
            discover_modified_files(&store, &root.to_string_lossy(), &[]).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "visible.txt");
    }

    #[tokio::test]
    async fn skips_excluded_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let root = dir.path().join("tree");
        write_tree(&root);

        let exclude = root.join("subdir").to_string_lossy().into_owned();
        let files = discover_modified_files(&store, &root.to_string_lossy(), &[exclude])
            .await
            .unwrap();

        let mut names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["file1.txt", "file2.bin"]);
    }

    #[tokio::test]
    async fn unmodified_files_are_not_rediscovered() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let root = dir.path().join("tree");
        write_tree(&root);

        let first =
            discover_modified_files(&store, &root.to_string_lossy(), &[]).await.unwrap();
        assert_eq!(first.len(), 4);

        // Record every file as freshly indexed.
        let metadata = serde_json::to_string(&FileMetadata {
            last_indexed: Utc::now(),
        })
        .unwrap();
        for file in &first {
            store.set(Namespace::Files, &file.path, &metadata).await.unwrap();
        }

        let second =
            discover_modified_files(&store, &root.to_string_lossy(), &[]).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn malformed_metadata_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("file1.txt"), "alpha").unwrap();

        let path = root.join("file1.txt").to_string_lossy().into_owned();
        store
            .set(Namespace::Files, &path, "not valid json")
            .await
            .unwrap();

        let files =
            discover_modified_files(&store, &root.to_string_lossy(), &[]).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn modified_file_is_rediscovered() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("file1.txt"), "alpha").unwrap();

        let path = root.join("file1.txt").to_string_lossy().into_owned();
        let stale = serde_json::to_string(&FileMetadata {
            last_indexed: Utc::now() - chrono::Duration::hours(1),
        })
        .unwrap();
        store.set(Namespace::Files, &path, &stale).await.unwrap();

        let files =
            discover_modified_files(&store, &root.to_string_lossy(), &[]).await.unwrap();
        assert_eq!(files.len(), 1);
    }
}
