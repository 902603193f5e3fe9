//! Data models and configuration.

pub mod config;
pub mod receipt;

pub use config::SlipsConfig;
pub use receipt::{ItemFailure, ProcessedItem, ReceiptRecord, SourceItem};
