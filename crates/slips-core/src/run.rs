//! One intake run: resolve folders, list, process, relocate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ItemError, Result, SlipsError};
use crate::models::config::SlipsConfig;
use crate::pipeline::{IngestionPipeline, ItemOutcome, PipelineReport};
use crate::receipt::ReceiptClassifier;
use crate::relocation::{RelocationOutcome, RelocationService, RelocationStatus};
use crate::remote::{ClassificationService, DocumentStore};

/// Progress notifications emitted while a run executes.
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// The source folder was listed.
    Listed { count: usize },
    /// An item left the pipeline.
    ItemFinished(&'a ItemOutcome),
    /// Relocation of processed items is starting.
    Relocating { count: usize },
}

/// Everything a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub listed: usize,
    pub pipeline: PipelineReport,
    pub relocations: Vec<RelocationOutcome>,
    pub dry_run: bool,
}

/// Per-run counts and failure reasons keyed by source item id.
///
/// Every listed item lands in exactly one of `processed`, `failed` and
/// `cancelled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub listed: usize,
    /// Processed items that did not later fail relocation.
    pub processed: usize,
    /// Processed items that were uploaded.
    pub relocated: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures: BTreeMap<String, ItemError>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut failures: BTreeMap<String, ItemError> = self
            .pipeline
            .failures
            .iter()
            .map(|f| (f.item.id.clone(), f.error.clone()))
            .collect();

        let mut relocated = 0;
        let mut relocation_failed = 0;
        let mut cancelled = self.pipeline.cancelled.len();
        for outcome in &self.relocations {
            match &outcome.status {
                RelocationStatus::Moved { .. } | RelocationStatus::Uploaded { .. } => relocated += 1,
                RelocationStatus::Failed { error, .. } => {
                    relocation_failed += 1;
                    failures.insert(outcome.source.id.clone(), error.clone());
                }
                RelocationStatus::Cancelled => cancelled += 1,
            }
        }

        RunSummary {
            listed: self.listed,
            processed: self.pipeline.processed.len().saturating_sub(relocation_failed),
            relocated,
            failed: failures.len(),
            cancelled,
            failures,
        }
    }
}

/// A configured intake run over one source and one destination folder.
pub struct IntakeRun {
    store: Arc<dyn DocumentStore>,
    pipeline: IngestionPipeline,
    relocation: RelocationService,
    source_folder: String,
    destination_folder: String,
    listing_timeout: Duration,
    dry_run: bool,
}

impl IntakeRun {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        service: Arc<dyn ClassificationService>,
        config: &SlipsConfig,
    ) -> Self {
        let classifier = ReceiptClassifier::new(service).with_timeout(config.classifier.timeout());
        let pipeline =
            IngestionPipeline::new(store.clone(), classifier).with_config(config.pipeline.clone());
        let relocation =
            RelocationService::new(store.clone()).with_config(config.relocation.clone());

        Self {
            store,
            pipeline,
            relocation,
            source_folder: config.storage.source_folder.clone(),
            destination_folder: config.storage.destination_folder.clone(),
            listing_timeout: config.storage.timeout(),
            dry_run: false,
        }
    }

    /// Process and classify but do not upload or delete anything.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute the run.
    ///
    /// Folder resolution, destination listing and source listing failures are
    /// returned as `RemoteUnavailable` before any item is fetched or classified.
    /// Item failures are reported in the returned [`RunReport`].
    pub async fn execute<F>(&self, cancel: &CancellationToken, mut on_event: F) -> Result<RunReport>
    where
        F: FnMut(RunEvent<'_>),
    {
        let source_id = self.resolve_folder(&self.source_folder).await?;
        let destination_id = self.resolve_folder(&self.destination_folder).await?;
        let taken = if self.dry_run {
            None
        } else {
            self.relocation.existing_names(&destination_id).await?
        };

        let items = match tokio::time::timeout(self.listing_timeout, self.store.list(&source_id)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                return Err(SlipsError::RemoteUnavailable(format!(
                    "cannot list {}: {}",
                    self.source_folder, e
                )));
            }
            Err(_) => {
                return Err(SlipsError::RemoteUnavailable(format!(
                    "listing {} timed out",
                    self.source_folder
                )));
            }
        };
        let listed = items.len();
        info!("Found {} item(s) in {}", listed, self.source_folder);
        on_event(RunEvent::Listed { count: listed });

        let pipeline = self
            .pipeline
            .run_with(items, cancel, |outcome| on_event(RunEvent::ItemFinished(outcome)))
            .await;

        let relocations = if self.dry_run || pipeline.processed.is_empty() {
            Vec::new()
        } else {
            on_event(RunEvent::Relocating {
                count: pipeline.processed.len(),
            });
            self.relocation
                .relocate_into(&pipeline.processed, &destination_id, taken, cancel)
                .await
        };

        Ok(RunReport {
            listed,
            pipeline,
            relocations,
            dry_run: self.dry_run,
        })
    }

    async fn resolve_folder(&self, name: &str) -> Result<String> {
        match tokio::time::timeout(self.listing_timeout, self.store.find_folder(name)).await {
            Ok(Ok(Some(id))) => Ok(id),
            Ok(Ok(None)) => Err(SlipsError::RemoteUnavailable(format!(
                "folder {:?} not found",
                name
            ))),
            Ok(Err(e)) => Err(SlipsError::RemoteUnavailable(format!(
                "cannot resolve folder {:?}: {}",
                name, e
            ))),
            Err(_) => Err(SlipsError::RemoteUnavailable(format!(
                "resolving folder {:?} timed out",
                name
            ))),
        }
    }
}
