//! Run configuration
//!
//! Built by the CLI from flags and environment variables and handed to the
//! store constructor. Nothing in the library reads the environment itself.

use crate::graph::{BridgeResult, RetryPolicy, UpsertEngine};
use crate::storage::{GraphStore, OpenStore, SqliteStore, StorageError};
use crate::adapter::{geographic, linker};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where the graph lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// Embedded SQLite database file
    Sqlite { path: PathBuf },
    /// Neo4j server over bolt
    #[cfg(feature = "neo4j")]
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
}

impl StoreConfig {
    /// SQLite at the default location
    pub fn default_sqlite() -> Self {
        StoreConfig::Sqlite {
            path: default_db_path(),
        }
    }
}

/// Identity of the producing process, recorded as a Toolchain node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub name: String,
    pub version: String,
}

impl ToolchainConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Default database path (~/.local/share/neobridge/neobridge.db)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("neobridge").join("neobridge.db")
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub toolchain: ToolchainConfig,
    /// Year stamped on DataSet nodes by the gazetteer import
    pub dataset_year: i64,
    /// Nodes fetched per linking page
    pub page_size: usize,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn new(store: StoreConfig, toolchain: ToolchainConfig) -> Self {
        Self {
            store,
            toolchain,
            dataset_year: geographic::DEFAULT_DATASET_YEAR,
            page_size: linker::DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Connect to the configured store.
    pub async fn open_store(&self) -> BridgeResult<Arc<dyn GraphStore>> {
        match &self.store {
            StoreConfig::Sqlite { path } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(StorageError::from)?;
                }
                info!(path = %path.display(), "opening sqlite store");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
            #[cfg(feature = "neo4j")]
            StoreConfig::Neo4j {
                uri,
                user,
                password,
            } => {
                info!(%uri, %user, "connecting to neo4j");
                let store = crate::storage::Neo4jStore::connect(uri, user, password).await?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Connect and wrap the store in an engine using this config's retry policy.
    pub async fn engine(&self) -> BridgeResult<Arc<UpsertEngine>> {
        let store = self.open_store().await?;
        Ok(Arc::new(UpsertEngine::with_retry(store, self.retry)))
    }
}
