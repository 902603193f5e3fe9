//! Capability interfaces for the storage and classification collaborators.
//!
//! The pipeline only sees [`DocumentStore`] and [`ClassificationService`].
//! Implementations:
//! - [`LocalStore`]: a directory tree, always available
//! - `DriveStore`: Google Drive v3 (feature `remote`)
//! - `OpenAiClassifier`: OpenAI Responses API with structured output (feature `remote`)

mod local;

#[cfg(feature = "remote")]
pub mod credential;
#[cfg(feature = "remote")]
mod drive;
#[cfg(feature = "remote")]
mod openai;

pub use local::LocalStore;

#[cfg(feature = "remote")]
pub use credential::{Credential, CredentialSession};
#[cfg(feature = "remote")]
pub use drive::DriveStore;
#[cfg(feature = "remote")]
pub use openai::OpenAiClassifier;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::models::receipt::SourceItem;
use crate::pdf::ExtractedImage;

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Source and destination collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Resolve a folder name to its identifier.
    async fn find_folder(&self, name: &str) -> Result<Option<String>>;

    /// List the entries of a folder.
    async fn list(&self, folder_id: &str) -> Result<Vec<SourceItem>>;

    /// Download an entry's content.
    async fn fetch(&self, id: &str) -> Result<Vec<u8>>;

    /// Store `data` as `name` inside `folder_id`, returning the new entry's id.
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
        folder_id: &str,
    ) -> Result<String>;

    /// Remove an entry.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// External structured-classification service.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    /// Submit an image together with the JSON schema the answer must follow.
    async fn classify(&self, image: &ExtractedImage, schema: &Value) -> Result<Value>;
}

/// Map a non-success HTTP response to a [`RemoteError`].
#[cfg(feature = "remote")]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(RemoteError::Auth(body)),
        404 => Err(RemoteError::NotFound(body)),
        code => Err(RemoteError::Status { status: code, body }),
    }
}
