//! Receipt data flowing through one intake run.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ItemError;
use crate::pdf::ExtractedImage;
use crate::receipt::Currency;

/// An entry of a source collection.
///
/// Content is not part of the entry; the pipeline fetches it through the store
/// and keeps the bytes only for the duration of the item's processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Store-specific identifier.
    pub id: String,

    /// Display name (file name).
    pub name: String,

    /// MIME type, if the store reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl SourceItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Lowercased file extension of the display name.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Structured classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    /// Merchant as reported by the classifier.
    pub merchant: String,

    /// Receipt date.
    pub date: NaiveDate,

    /// Total in the receipt's own currency.
    pub source_total: Decimal,

    /// Currency the receipt was issued in.
    pub currency: Currency,

    /// Total converted to ZAR, rounded to two decimals.
    pub total: Decimal,

    /// Name satisfying the canonical grammar.
    pub canonical_name: String,

    /// Name proposed by the classification service, kept for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_name: Option<String>,
}

/// A source item that made it through extraction, classification and naming.
#[derive(Debug, Clone)]
pub struct ProcessedItem {
    pub source: SourceItem,
    pub image: ExtractedImage,
    pub record: ReceiptRecord,
    /// Canonical name with the image extension appended.
    pub file_name: String,
}

/// A source item that failed one of the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: SourceItem,
    pub error: ItemError,
}
