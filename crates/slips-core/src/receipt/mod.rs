//! Receipt classification and canonical naming.

pub mod classifier;
pub mod currency;
pub mod naming;
pub mod patterns;

pub use classifier::{REQUIRED_FIELDS, ReceiptClassifier, interpret_response, response_schema};
pub use currency::Currency;
pub use naming::{NameFormatter, canonical_name, slugify_merchant, validate_canonical_name};
