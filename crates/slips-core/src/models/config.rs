//! Configuration structures for the intake pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlipsError};

/// Main configuration for the slips pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlipsConfig {
    /// Source and destination storage configuration.
    pub storage: StorageConfig,

    /// Classification service configuration.
    pub classifier: ClassifierConfig,

    /// Per-item pipeline configuration.
    pub pipeline: PipelineConfig,

    /// Upload and deletion configuration.
    pub relocation: RelocationConfig,
}

/// Which storage implementation backs the source and destination folders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Google Drive.
    #[default]
    Drive,
    /// A local directory whose subdirectories act as folders.
    Local,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage implementation.
    pub backend: StorageBackend,

    /// Folder holding unprocessed documents.
    pub source_folder: String,

    /// Folder receiving renamed images.
    pub destination_folder: String,

    /// Root directory for the local backend.
    pub local_root: PathBuf,

    /// Authorized-user token file for the Drive backend.
    pub token_path: PathBuf,

    /// Listing page size.
    pub page_size: u32,

    /// Timeout for listing and folder lookups, in seconds.
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Drive,
            source_folder: "Inbox".to_string(),
            destination_folder: "Slips".to_string(),
            local_root: PathBuf::from("."),
            token_path: PathBuf::from("token.json"),
            page_size: 100,
            timeout_secs: 30,
        }
    }
}

/// Classification service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Responses API endpoint.
    pub endpoint: String,

    /// Model used for classification.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Timeout for a single classification call, in seconds.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/responses".to_string(),
            model: "gpt-4o-2024-08-06".to_string(),
            api_key_env: "OPENAI_TOKEN".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Per-item pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of items processed concurrently (1 = sequential, input order).
    pub workers: usize,

    /// Extra classification attempts after a `ClassificationError`.
    pub max_retries: u32,

    /// Base delay between classification attempts, doubled per attempt.
    pub retry_backoff_ms: u64,

    /// File extensions accepted as intake documents.
    pub intake_extensions: Vec<String>,

    /// Timeout for fetching a document, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 0,
            retry_backoff_ms: 500,
            intake_extensions: vec!["pdf".to_string()],
            fetch_timeout_secs: 60,
        }
    }
}

/// What to do when a file name is already taken in the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Refuse the upload and keep the original.
    #[default]
    Reject,
    /// Upload anyway; the destination may then hold several files with the same name.
    Allow,
}

/// Upload and deletion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocationConfig {
    /// Timeout for a single upload, in seconds.
    pub upload_timeout_secs: u64,

    /// Timeout for a single deletion, in seconds.
    pub delete_timeout_secs: u64,

    /// Destination name collision policy.
    pub collision: CollisionPolicy,

    /// Delete originals after a confirmed upload.
    pub delete_originals: bool,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            upload_timeout_secs: 120,
            delete_timeout_secs: 30,
            collision: CollisionPolicy::Reject,
            delete_originals: true,
        }
    }
}

impl SlipsConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SlipsError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| SlipsError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl RelocationConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }
}
