//! Durable key-value metadata store.
//!
//! Two logical namespaces back the indexing engine: *files* maps absolute
//! file paths to serialized [`FileMetadata`], *requests* maps request ids to
//! integer progress statuses (decimal ASCII). Keys and values are opaque
//! strings; empty keys are rejected. Backed by a single SQLite file in WAL
//! mode with full synchronous commits, so successful writes survive process
//! restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;

use crate::config::Config;
use crate::error::{Error, Result};

/// Logical sub-keyspace of the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Absolute file path → serialized [`FileMetadata`].
    Files,
    /// Request id → integer progress status.
    Requests,
}

impl Namespace {
    fn as_str(self) -> &'static str {
        match self {
            Namespace::Files => "files",
            Namespace::Requests => "requests",
        }
    }
}

/// Per-file bookkeeping persisted in the *files* namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub last_indexed: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub async fn open(config: &Config) -> Result<Self> {
        let db_path = config.kvdb_file();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn set(&self, namespace: Namespace, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key cannot be empty".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value) VALUES (?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, namespace: Namespace, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key cannot be empty".to_string()));
        }

        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv_entries WHERE namespace = ? AND key = ?")
                .bind(namespace.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        value.ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub async fn delete(&self, namespace: Namespace, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key cannot be empty".to_string()));
        }

        sqlx::query("DELETE FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(namespace.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Every key currently set in the namespace, without duplicates.
    pub async fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv_entries WHERE namespace = ?")
                .bind(namespace.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(keys)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_storage_root(dir.path());
        let store = MetadataStore::open(&config).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let (_dir, store) = open_store().await;

        store.set(Namespace::Files, "/a/b", "v1").await.unwrap();
        assert_eq!(store.get(Namespace::Files, "/a/b").await.unwrap(), "v1");

        store.set(Namespace::Files, "/a/b", "v2").await.unwrap();
        assert_eq!(store.get(Namespace::Files, "/a/b").await.unwrap(), "v2");

        store.delete(Namespace::Files, "/a/b").await.unwrap();
        assert!(matches!(
            store.get(Namespace::Files, "/a/b").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let (_dir, store) = open_store().await;

        store.set(Namespace::Files, "shared", "files").await.unwrap();
        store
            .set(Namespace::Requests, "shared", "requests")
            .await
            .unwrap();

        assert_eq!(store.get(Namespace::Files, "shared").await.unwrap(), "files");
        assert_eq!(
            store.get(Namespace::Requests, "shared").await.unwrap(),
            "requests"
        );

        store.delete(Namespace::Files, "shared").await.unwrap();
        assert_eq!(
            store.get(Namespace::Requests, "shared").await.unwrap(),
            "requests"
        );
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let (_dir, store) = open_store().await;

        assert!(matches!(
            store.set(Namespace::Files, "", "v").await,
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            store.get(Namespace::Files, "").await,
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            store.delete(Namespace::Files, "").await,
            Err(Error::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn keys_enumerates_namespace() {
        let (_dir, store) = open_store().await;

        store.set(Namespace::Files, "/x", "1").await.unwrap();
        store.set(Namespace::Files, "/y", "1").await.unwrap();
        store.set(Namespace::Requests, "r1", "0").await.unwrap();

        let mut keys = store.keys(Namespace::Files).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["/x".to_string(), "/y".to_string()]);
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_storage_root(dir.path());

        let store = MetadataStore::open(&config).await.unwrap();
        store.set(Namespace::Requests, "r1", "100").await.unwrap();
        store.close().await;

        let reopened = MetadataStore::open(&config).await.unwrap();
        assert_eq!(
            reopened.get(Namespace::Requests, "r1").await.unwrap(),
            "100"
        );
    }
}
