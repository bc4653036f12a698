use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::accounting::AccountingSnapshot;

/// Failure talking to a storage backend. The recorder logs these and
/// keeps going; they never abort event processing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed snapshot document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Whole-document persistence for the accounting snapshot: `load` reads
/// everything, `save` overwrites everything.
#[async_trait]
pub trait AccountingStore: Send + Sync {
    async fn load(&self) -> Result<AccountingSnapshot, StoreError>;
    async fn save(&self, snapshot: &AccountingSnapshot) -> Result<(), StoreError>;
}

/// Keeps the snapshot in process memory; everything is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<AccountingSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountingStore for MemoryStore {
    async fn load(&self) -> Result<AccountingSnapshot, StoreError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &AccountingSnapshot) -> Result<(), StoreError> {
        *self.snapshot.write().await = snapshot.clone();
        Ok(())
    }
}

/// One JSON document on local disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staged = self.path.clone();
        staged.set_extension("tmp");
        staged
    }
}

#[async_trait]
impl AccountingStore for JsonFileStore {
    async fn load(&self) -> Result<AccountingSnapshot, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // First run: no document yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AccountingSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save(&self, snapshot: &AccountingSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        // Staged next to the document and renamed into place; a torn
        // write never reaches the real path.
        let staged = self.staging_path();
        tokio::fs::write(&staged, json).await?;
        tokio::fs::rename(&staged, &self.path).await?;
        Ok(())
    }
}

/// Remote JSON document behind a plain GET/PUT endpoint: a gist raw
/// URL, a JSON bin, any key-value web API that serves one document.
pub struct HttpKvStore {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpKvStore {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            auth_token,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AccountingStore for HttpKvStore {
    async fn load(&self) -> Result<AccountingSnapshot, StoreError> {
        let response = self
            .authorized(self.client.get(&self.url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn save(&self, snapshot: &AccountingSnapshot) -> Result<(), StoreError> {
        self.authorized(self.client.put(&self.url))
            .json(snapshot)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
