use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8192".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Parent directory for all persistent state.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Search index directory, relative to `path`.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    /// Metadata store file, relative to `path`.
    #[serde(default = "default_kvdb_path")]
    pub kvdb_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            index_path: default_index_path(),
            kvdb_path: default_kvdb_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("index")
}

fn default_kvdb_path() -> PathBuf {
    PathBuf::from("metadata.db")
}

impl Config {
    /// Directory holding the full-text index, under the storage root.
    pub fn index_dir(&self) -> PathBuf {
        self.storage.path.join(&self.storage.index_path)
    }

    /// File holding the metadata store, under the storage root.
    pub fn kvdb_file(&self) -> PathBuf {
        self.storage.path.join(&self.storage.kvdb_path)
    }

    /// Configuration rooted at `path`, with default relative layout.
    /// Used by the one-shot CLI commands and tests.
    pub fn with_storage_root(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                path: path.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.storage.path.as_os_str().is_empty() {
        anyhow::bail!("storage.path must not be empty");
    }

    for (key, value) in [
        ("storage.index_path", &config.storage.index_path),
        ("storage.kvdb_path", &config.storage.kvdb_path),
    ] {
        if value.as_os_str().is_empty() {
            anyhow::bail!("{} must not be empty", key);
        }
        if value.is_absolute() {
            anyhow::bail!("{} must be relative to storage.path", key);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_keys_omitted() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8192");
        assert_eq!(config.index_dir(), PathBuf::from("./data/index"));
        assert_eq!(config.kvdb_file(), PathBuf::from("./data/metadata.db"));
    }

    #[test]
    fn rejects_absolute_index_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trawl.toml");
        std::fs::write(&path, "[storage]\nindex_path = \"/abs/index\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("relative"));
    }

    #[test]
    fn loads_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trawl.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9000"

[storage]
path = "/var/lib/trawl"
index_path = "fti"
kvdb_path = "kv.db"
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.index_dir(), PathBuf::from("/var/lib/trawl/fti"));
        assert_eq!(config.kvdb_file(), PathBuf::from("/var/lib/trawl/kv.db"));
    }
}
