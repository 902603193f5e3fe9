//! Error types for the slips-core library.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of reasons an item or a run can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The document has no usable image on its first page, or is not a PDF.
    NoImageFound,
    /// The classification service failed, timed out or returned a bad payload.
    ClassificationError,
    /// The receipt uses a currency without a fixed conversion rate.
    UnsupportedCurrency,
    /// The canonical name does not satisfy the naming grammar.
    InvalidName,
    /// The renamed image could not be uploaded.
    UploadError,
    /// The original could not be deleted after a confirmed upload.
    DeletionError,
    /// Storage or authentication is unreachable.
    RemoteUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoImageFound => "NoImageFound",
            ErrorKind::ClassificationError => "ClassificationError",
            ErrorKind::UnsupportedCurrency => "UnsupportedCurrency",
            ErrorKind::InvalidName => "InvalidName",
            ErrorKind::UploadError => "UploadError",
            ErrorKind::DeletionError => "DeletionError",
            ErrorKind::RemoteUnavailable => "RemoteUnavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the slips library.
#[derive(Error, Debug)]
pub enum SlipsError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// Classification service or payload error.
    #[error("classification failed: {0}")]
    Classification(String),

    /// Currency without a conversion rate.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Canonical name rejected by the grammar.
    #[error("invalid canonical name: {0}")]
    InvalidName(String),

    /// Upload to the destination failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// Deletion from the source failed.
    #[error("deletion failed: {0}")]
    Deletion(String),

    /// Listing, fetching or authentication failed.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SlipsError {
    /// The [`ErrorKind`] reported for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlipsError::Pdf(_) => ErrorKind::NoImageFound,
            SlipsError::Classification(_) => ErrorKind::ClassificationError,
            SlipsError::UnsupportedCurrency(_) => ErrorKind::UnsupportedCurrency,
            SlipsError::InvalidName(_) => ErrorKind::InvalidName,
            SlipsError::Upload(_) => ErrorKind::UploadError,
            SlipsError::Deletion(_) => ErrorKind::DeletionError,
            SlipsError::RemoteUnavailable(_) | SlipsError::Config(_) | SlipsError::Io(_) => {
                ErrorKind::RemoteUnavailable
            }
        }
    }
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// The first page carries no image that can be extracted.
    #[error("no embedded image on the first page")]
    NoImageFound,

    /// The item is not an intake document.
    #[error("not a PDF document: {0}")]
    Unsupported(String),
}

/// Errors returned by remote collaborators (storage, classification, auth).
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Credentials are missing, expired or were rejected.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

/// Per-item error record, detached from the error's source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&SlipsError> for ItemError {
    fn from(err: &SlipsError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<SlipsError> for ItemError {
    fn from(err: SlipsError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result type for the slips library.
pub type Result<T> = std::result::Result<T, SlipsError>;
