//! Upload of renamed images and deletion of their originals.
//!
//! All uploads happen before any deletion. An original is deleted only after
//! its upload returned an id.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ItemError, Result, SlipsError};
use crate::models::config::{CollisionPolicy, RelocationConfig};
use crate::models::receipt::{ProcessedItem, SourceItem};
use crate::remote::{self, DocumentStore};

/// Final state of one processed item after relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelocationStatus {
    /// Uploaded and original deleted.
    Moved { uploaded_id: String },
    /// Uploaded; original kept on request.
    Uploaded { uploaded_id: String },
    /// Upload or deletion failed. `uploaded_id` is set when only the deletion failed.
    Failed {
        error: ItemError,
        uploaded_id: Option<String>,
    },
    /// Not uploaded because the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocationOutcome {
    pub source: SourceItem,
    pub file_name: String,
    #[serde(flatten)]
    pub status: RelocationStatus,
}

impl RelocationOutcome {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            RelocationStatus::Failed { error, .. } => Some(error.kind),
            _ => None,
        }
    }

    pub fn uploaded_id(&self) -> Option<&str> {
        match &self.status {
            RelocationStatus::Moved { uploaded_id } | RelocationStatus::Uploaded { uploaded_id } => {
                Some(uploaded_id)
            }
            RelocationStatus::Failed { uploaded_id, .. } => uploaded_id.as_deref(),
            RelocationStatus::Cancelled => None,
        }
    }

    fn failed(&mut self, err: SlipsError, uploaded_id: Option<String>) {
        let error = ItemError::from(&err);
        warn!("{} ({}): {}", self.source.name, self.file_name, error);
        self.status = RelocationStatus::Failed { error, uploaded_id };
    }
}

/// Moves processed items into the destination folder.
pub struct RelocationService {
    store: Arc<dyn DocumentStore>,
    config: RelocationConfig,
}

async fn with_timeout<T>(
    duration: Duration,
    fut: impl Future<Output = remote::Result<T>>,
) -> std::result::Result<T, String> {
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", duration)),
    }
}

impl RelocationService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            config: RelocationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RelocationConfig) -> Self {
        self.config = config;
        self
    }

    /// List the destination and upload every processed item into it.
    ///
    /// Only a failure to list the destination (needed for the collision check)
    /// fails the call. See [`RelocationService::relocate_into`].
    pub async fn relocate(
        &self,
        processed: &[ProcessedItem],
        destination_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelocationOutcome>> {
        let taken = self.existing_names(destination_id).await?;
        Ok(self.relocate_into(processed, destination_id, taken, cancel).await)
    }

    /// Upload every processed item, then delete the originals of confirmed uploads.
    ///
    /// `taken` holds the destination's names from [`RelocationService::existing_names`];
    /// `None` disables the collision check. Returns one outcome per input item,
    /// in input order.
    pub async fn relocate_into(
        &self,
        processed: &[ProcessedItem],
        destination_id: &str,
        mut taken: Option<HashSet<String>>,
        cancel: &CancellationToken,
    ) -> Vec<RelocationOutcome> {
        let mut outcomes: Vec<RelocationOutcome> = processed
            .iter()
            .map(|item| RelocationOutcome {
                source: item.source.clone(),
                file_name: item.file_name.clone(),
                status: RelocationStatus::Cancelled,
            })
            .collect();

        // Upload pass
        let mut uploaded: Vec<(usize, String)> = Vec::new();
        for (index, item) in processed.iter().enumerate() {
            let outcome = &mut outcomes[index];
            if cancel.is_cancelled() {
                debug!("Skipping upload of {}: cancelled", item.source.name);
                continue;
            }

            let collides = taken
                .as_mut()
                .is_some_and(|names| !names.insert(item.file_name.clone()));
            if collides {
                outcome.failed(
                    SlipsError::InvalidName(format!(
                        "{} already exists in the destination",
                        item.file_name
                    )),
                    None,
                );
                continue;
            }

            let upload = self.store.upload(
                &item.file_name,
                item.image.mime_type(),
                &item.image.data,
                destination_id,
            );
            match with_timeout(self.config.upload_timeout(), upload).await {
                Ok(id) => {
                    debug!("Uploaded {} as {}", item.file_name, id);
                    uploaded.push((index, id));
                }
                Err(e) => {
                    if let Some(names) = taken.as_mut() {
                        names.remove(&item.file_name);
                    }
                    outcome.failed(SlipsError::Upload(e), None);
                }
            }
        }

        // Deletion pass, strictly after all uploads
        for (index, uploaded_id) in uploaded {
            let outcome = &mut outcomes[index];
            if !self.config.delete_originals {
                outcome.status = RelocationStatus::Uploaded { uploaded_id };
                continue;
            }

            let delete = self.store.delete(&outcome.source.id);
            match with_timeout(self.config.delete_timeout(), delete).await {
                Ok(()) => {
                    info!("Moved {} -> {}", outcome.source.name, outcome.file_name);
                    outcome.status = RelocationStatus::Moved { uploaded_id };
                }
                Err(e) => outcome.failed(SlipsError::Deletion(e), Some(uploaded_id)),
            }
        }

        outcomes
    }

    /// Names already present in the destination, when collisions are rejected.
    ///
    /// Returns `None` under [`CollisionPolicy::Allow`] without touching the store.
    pub async fn existing_names(&self, destination_id: &str) -> Result<Option<HashSet<String>>> {
        if self.config.collision == CollisionPolicy::Allow {
            return Ok(None);
        }

        let entries = with_timeout(self.config.upload_timeout(), self.store.list(destination_id))
            .await
            .map_err(|e| {
                SlipsError::RemoteUnavailable(format!(
                    "cannot list destination {}: {}",
                    destination_id, e
                ))
            })?;
        Ok(Some(entries.into_iter().map(|e| e.name).collect()))
    }
}
