//! Core library for receipt intake.
//!
//! This crate provides:
//! - First-page image extraction from scanned PDFs
//! - Receipt classification through a structured-output AI service
//! - Canonical naming (`merchant_YYYY-MM-DD_123.45zar`) with fixed ZAR conversion
//! - A per-item ingestion pipeline with bounded concurrency and cancellation
//! - Upload-then-delete relocation into the destination folder
//! - Storage and classification backends (Google Drive, OpenAI, local directory)

pub mod error;
pub mod models;
pub mod pdf;
pub mod pipeline;
pub mod receipt;
pub mod relocation;
pub mod remote;
pub mod run;

pub use error::{ErrorKind, ItemError, Result, SlipsError};
pub use models::{ItemFailure, ProcessedItem, ReceiptRecord, SlipsConfig, SourceItem};
pub use pdf::{ExtractedImage, ImageEncoding, ImageExtractor};
pub use pipeline::{IngestionPipeline, ItemOutcome, PipelineReport};
pub use receipt::{Currency, NameFormatter, ReceiptClassifier};
pub use relocation::{RelocationOutcome, RelocationService, RelocationStatus};
pub use remote::{ClassificationService, DocumentStore, LocalStore};
pub use run::{IntakeRun, RunEvent, RunReport, RunSummary};
