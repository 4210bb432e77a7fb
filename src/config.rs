//! Configuration for the persistence layer.
//!
//! Backend selection is driven by the presence of a database URL:
//! if `AGORA_DATABASE_URL` (or an explicit [`StoreConfig::database_url`]) is
//! set, [`crate::Store::connect`] commits to the database backend for the
//! lifetime of the process; otherwise it uses the file backend.
//!
//! Data directory precedence:
//! 1. `AGORA_DATA_DIR` environment variable
//! 2. `~/.config/agora/data` (production default)
//! 3. `./data` (fallback for development)

use std::path::PathBuf;

const DEV_DATA_DIR: &str = "./data";

/// Persistence configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the per-collection JSON documents (file mode) and
    /// the migration completion marker.
    pub data_dir: PathBuf,
    /// Database connection URL. `Some` commits the process to database mode.
    pub database_url: Option<String>,
}

impl StoreConfig {
    /// Resolve configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_url: std::env::var("AGORA_DATABASE_URL")
                .ok()
                .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    /// File-mode configuration rooted at an explicit data directory.
    pub fn file(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_url: None,
        }
    }

    /// Database-mode configuration. The data dir is still used for the
    /// migration source documents and the completion marker.
    pub fn database(data_dir: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_url: Some(url.into()),
        }
    }
}

/// Get the data directory for file-mode persistence.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AGORA_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(dirs) = directories::BaseDirs::new() {
        return dirs.home_dir().join(".config/agora/data");
    }

    PathBuf::from(DEV_DATA_DIR)
}
