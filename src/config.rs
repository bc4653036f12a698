use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::store::{AccountingStore, HttpKvStore, JsonFileStore, MemoryStore};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value {1:?} for {0}")]
    InvalidVar(&'static str, String),
    #[error("unknown STORE_BACKEND {0:?} (expected memory, file or http)")]
    UnknownBackend(String),
}

/// Runtime configuration, read from the environment. `.env` files work
/// when the caller loads them first.
#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub store: StoreConfig,
    /// Overrides the recorder's store timeout when set.
    pub store_timeout: Option<Duration>,
}

/// Which accounting backend to run against.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Memory,
    File { path: PathBuf },
    Http { url: String, auth_token: Option<String> },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let discord_token = require("DISCORD_TOKEN")?;

        let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "file".to_string());
        let store = match backend.as_str() {
            "memory" => StoreConfig::Memory,
            "file" => StoreConfig::File {
                path: std::env::var("DATA_FILE")
                    .unwrap_or_else(|_| "voice_time.json".to_string())
                    .into(),
            },
            "http" => StoreConfig::Http {
                url: require("DATA_URL")?,
                auth_token: std::env::var("DATA_TOKEN").ok(),
            },
            _ => return Err(ConfigError::UnknownBackend(backend)),
        };

        let store_timeout = match std::env::var("STORE_TIMEOUT_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(ConfigError::InvalidVar("STORE_TIMEOUT_SECS", raw)),
            },
            Err(_) => None,
        };

        Ok(Self {
            discord_token,
            store,
            store_timeout,
        })
    }
}

impl StoreConfig {
    pub fn build(&self) -> Arc<dyn AccountingStore> {
        match self {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::File { path } => Arc::new(JsonFileStore::new(path.clone())),
            StoreConfig::Http { url, auth_token } => {
                Arc::new(HttpKvStore::new(url.clone(), auth_token.clone()))
            }
        }
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}
