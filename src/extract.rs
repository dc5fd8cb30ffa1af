//! Per-file content extraction.
//!
//! Turns a [`FileInfo`] into a [`Document`]. Files on the text allowlist are
//! read through a hard 5 MiB cap regardless of their stat-reported size;
//! everything else yields an empty `content` without touching the file.
//! Errors are returned to the caller, which decides whether to skip the file.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::models::{Document, FileInfo};

/// Hard cap on bytes read from a single file.
pub const MAX_CONTENT_EXTRACTION_SIZE: u64 = 5 * 1024 * 1024;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub async fn extract_content(file_info: &FileInfo) -> Result<Document> {
    let mut doc = Document {
        id: file_info.path.clone(),
        path: file_info.path.clone(),
        name: file_info.name.clone(),
        content: String::new(),
        size: file_info.size,
        mod_time: file_info.mod_time,
    };

    if file_info.is_text {
        let file = tokio::fs::File::open(&file_info.path).await?;
        let content = read_text_content(file, file_info.size).await?;
        doc.content = String::from_utf8_lossy(&content).into_owned();
    }

    Ok(doc)
}

async fn read_text_content(
    reader: impl AsyncRead + Unpin,
    file_size: i64,
) -> std::io::Result<Vec<u8>> {
    // Always cap the reader rather than trusting the stat-reported size.
    let mut limited = reader.take(MAX_CONTENT_EXTRACTION_SIZE);

    let capacity = if file_size > 0 && (file_size as u64) <= MAX_CONTENT_EXTRACTION_SIZE {
        file_size as usize
    } else {
        MAX_CONTENT_EXTRACTION_SIZE as usize
    };
    let mut content = Vec::with_capacity(capacity);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = limited.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        content.extend_from_slice(&buf[..n]);
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn file_info(path: &str, size: i64, is_text: bool) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            name: std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size,
            mod_time: Utc::now(),
            is_text,
        }
    }

    #[tokio::test]
    async fn reads_text_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello from the extractor").unwrap();

        let info = file_info(&path.to_string_lossy(), 24, true);
        let doc = extract_content(&info).await.unwrap();
        assert_eq!(doc.content, "hello from the extractor");
        assert_eq!(doc.id, doc.path);
    }

    #[tokio::test]
    async fn binary_file_yields_empty_content() {
        // Path does not even need to exist: binary files are never opened.
        let info = file_info("/nonexistent/blob.bin", 1024, false);
        let doc = extract_content(&info).await.unwrap();
        assert!(doc.content.is_empty());
        assert_eq!(doc.size, 1024);
    }

    #[tokio::test]
    async fn missing_text_file_returns_error() {
        let info = file_info("/nonexistent/gone.txt", 10, true);
        assert!(extract_content(&info).await.is_err());
    }

    #[tokio::test]
    async fn read_is_capped_at_five_mib() {
        let oversized = vec![b'a'; MAX_CONTENT_EXTRACTION_SIZE as usize + 4096];
        let content = read_text_content(oversized.as_slice(), oversized.len() as i64)
            .await
            .unwrap();
        assert_eq!(content.len(), MAX_CONTENT_EXTRACTION_SIZE as usize);
    }

    #[tokio::test]
    async fn short_read_is_accepted() {
        // Stat-reported size larger than the actual bytes available.
        let data = b"tiny";
        let content = read_text_content(&data[..], 1_000_000).await.unwrap();
        assert_eq!(content, b"tiny");
    }
}
