//! Subcommands and the wiring they share.

pub mod config;
pub mod run;
pub mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use slips_core::models::config::{SlipsConfig, StorageBackend};
use slips_core::remote::{CredentialSession, DocumentStore, DriveStore, LocalStore, OpenAiClassifier};

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("slips")
        .join("config.json")
}

/// Load the configuration from `--config`, the default location, or defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<SlipsConfig> {
    if let Some(path) = config_path {
        return SlipsConfig::from_file(Path::new(path))
            .with_context(|| format!("Failed to load config from {}", path));
    }

    let path = default_config_path();
    if path.exists() {
        debug!("Loading config from {}", path.display());
        Ok(SlipsConfig::from_file(&path)?)
    } else {
        Ok(SlipsConfig::default())
    }
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Storage backend selected by the configuration.
pub enum Store {
    Drive(Arc<DriveStore>),
    Local(Arc<LocalStore>),
}

impl Store {
    pub async fn open(config: &SlipsConfig) -> anyhow::Result<Self> {
        match config.storage.backend {
            StorageBackend::Local => {
                let root = &config.storage.local_root;
                if !root.is_dir() {
                    anyhow::bail!("Local root {} is not a directory", root.display());
                }
                Ok(Store::Local(Arc::new(LocalStore::new(root))))
            }
            StorageBackend::Drive => {
                let http = http_client(config.relocation.upload_timeout().max(config.storage.timeout()))?;
                let session = CredentialSession::acquire(&config.storage.token_path, http.clone())
                    .await
                    .map_err(|e| slips_core::SlipsError::RemoteUnavailable(e.to_string()))?;
                let store = DriveStore::new(http, session).with_page_size(config.storage.page_size);
                Ok(Store::Drive(Arc::new(store)))
            }
        }
    }

    pub fn as_dyn(&self) -> Arc<dyn DocumentStore> {
        match self {
            Store::Drive(store) => store.clone(),
            Store::Local(store) => store.clone(),
        }
    }

    /// Persist a refreshed credential. Call once all other handles are dropped.
    pub async fn close(self) -> anyhow::Result<()> {
        if let Store::Drive(store) = self {
            let store = Arc::try_unwrap(store)
                .map_err(|_| anyhow::anyhow!("Drive store still in use"))?;
            store.into_session().release().await?;
        }
        Ok(())
    }
}

/// Classification service from the configuration.
pub fn open_classifier(config: &SlipsConfig) -> anyhow::Result<Arc<OpenAiClassifier>> {
    let http = http_client(config.classifier.timeout())?;
    Ok(Arc::new(OpenAiClassifier::from_config(&config.classifier, http)?))
}
