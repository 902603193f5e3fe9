//! Per-item ingestion: intake check, fetch, extract, classify, name.
//!
//! Every item ends in exactly one of `processed`, `failures` or `cancelled`.
//! Item errors are recorded in the report and never abort the batch.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ItemError, PdfError, Result, SlipsError};
use crate::models::config::PipelineConfig;
use crate::models::receipt::{ItemFailure, ProcessedItem, ReceiptRecord, SourceItem};
use crate::pdf::{ExtractedImage, ImageExtractor};
use crate::receipt::{NameFormatter, ReceiptClassifier};
use crate::remote::DocumentStore;

const PDF_MIME_TYPE: &str = "application/pdf";

/// Outcome of one source item.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Processed(ProcessedItem),
    Failed(ItemFailure),
    /// Not started because the run was cancelled.
    Cancelled(SourceItem),
}

impl ItemOutcome {
    pub fn item(&self) -> &SourceItem {
        match self {
            ItemOutcome::Processed(p) => &p.source,
            ItemOutcome::Failed(f) => &f.item,
            ItemOutcome::Cancelled(item) => item,
        }
    }
}

/// Result of a pipeline pass over a batch.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub processed: Vec<ProcessedItem>,
    pub failures: Vec<ItemFailure>,
    pub cancelled: Vec<SourceItem>,
}

impl PipelineReport {
    /// Number of items accounted for.
    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len() + self.cancelled.len()
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Processed(p) => self.processed.push(p),
            ItemOutcome::Failed(f) => self.failures.push(f),
            ItemOutcome::Cancelled(item) => self.cancelled.push(item),
        }
    }
}

/// Drives source items through extraction, classification and naming.
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    extractor: ImageExtractor,
    classifier: ReceiptClassifier,
    formatter: NameFormatter,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn DocumentStore>, classifier: ReceiptClassifier) -> Self {
        Self {
            store,
            extractor: ImageExtractor::new(),
            classifier,
            formatter: NameFormatter::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_extractor(mut self, extractor: ImageExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a batch.
    pub async fn run(&self, items: Vec<SourceItem>, cancel: &CancellationToken) -> PipelineReport {
        self.run_with(items, cancel, |_| {}).await
    }

    /// Process a batch, calling `on_item` as each item finishes.
    ///
    /// With one worker items are processed in input order; with more, the
    /// order of `processed` and `failures` is unspecified.
    pub async fn run_with<F>(
        &self,
        items: Vec<SourceItem>,
        cancel: &CancellationToken,
        mut on_item: F,
    ) -> PipelineReport
    where
        F: FnMut(&ItemOutcome),
    {
        let workers = self.config.workers.max(1);
        info!("Processing {} items with {} worker(s)", items.len(), workers);

        let mut outcomes = stream::iter(items)
            .map(|item| async move {
                if cancel.is_cancelled() {
                    return ItemOutcome::Cancelled(item);
                }
                self.process_item(item).await
            })
            .buffer_unordered(workers);

        let mut report = PipelineReport::default();
        while let Some(outcome) = outcomes.next().await {
            on_item(&outcome);
            report.record(outcome);
        }

        info!(
            "Pipeline finished: {} processed, {} failed, {} cancelled",
            report.processed.len(),
            report.failures.len(),
            report.cancelled.len()
        );
        report
    }

    /// Run one item through every stage, converting errors into a failure record.
    pub async fn process_item(&self, item: SourceItem) -> ItemOutcome {
        match self.process(&item).await {
            Ok((image, record, file_name)) => {
                info!("{} -> {}", item.name, file_name);
                ItemOutcome::Processed(ProcessedItem {
                    source: item,
                    image,
                    record,
                    file_name,
                })
            }
            Err(err) => {
                let error = ItemError::from(&err);
                warn!("{} failed: {}", item.name, error);
                ItemOutcome::Failed(ItemFailure { item, error })
            }
        }
    }

    async fn process(&self, item: &SourceItem) -> Result<(ExtractedImage, ReceiptRecord, String)> {
        if !self.is_intake_document(item) {
            return Err(PdfError::Unsupported(item.name.clone()).into());
        }

        let document = self.fetch(item).await?;
        let image = self.extractor.extract(&document)?;
        drop(document);
        debug!(
            "Extracted {} image {}x{} from {}",
            image.encoding, image.width, image.height, item.name
        );

        let record = self.classify(&image).await?;
        let file_name = self.formatter.format(&record, image.encoding)?;

        Ok((image, record, file_name))
    }

    fn is_intake_document(&self, item: &SourceItem) -> bool {
        if item.mime_type.as_deref() == Some(PDF_MIME_TYPE) {
            return true;
        }
        item.extension().is_some_and(|ext| {
            self.config
                .intake_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        })
    }

    async fn fetch(&self, item: &SourceItem) -> Result<Vec<u8>> {
        let timeout = self.config.fetch_timeout();
        match tokio::time::timeout(timeout, self.store.fetch(&item.id)).await {
            Ok(Ok(bytes)) => {
                debug!("Fetched {} ({} bytes)", item.name, bytes.len());
                Ok(bytes)
            }
            Ok(Err(e)) => Err(SlipsError::RemoteUnavailable(format!(
                "cannot fetch {}: {}",
                item.id, e
            ))),
            Err(_) => Err(SlipsError::RemoteUnavailable(format!(
                "fetching {} timed out after {:?}",
                item.id, timeout
            ))),
        }
    }

    /// Classify with up to `max_retries` extra attempts on classification errors.
    async fn classify(&self, image: &ExtractedImage) -> Result<ReceiptRecord> {
        let mut attempt: u32 = 0;
        loop {
            match self.classifier.classify(image).await {
                Err(e)
                    if e.kind() == ErrorKind::ClassificationError
                        && attempt < self.config.max_retries =>
                {
                    let delay = self
                        .config
                        .retry_backoff()
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    debug!("Classification attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
