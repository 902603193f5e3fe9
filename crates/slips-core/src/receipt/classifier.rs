//! Receipt classification through an external structured-output service.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Number, Value, json};
use tracing::debug;

use super::currency::Currency;
use super::naming::{canonical_name, validate_canonical_name};
use crate::error::{Result, SlipsError};
use crate::models::receipt::ReceiptRecord;
use crate::pdf::ExtractedImage;
use crate::remote::ClassificationService;

/// Name of the structured response format.
pub const SCHEMA_NAME: &str = "receipt_data";

/// Fields every classification response must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["name", "merchant", "total", "date"];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// JSON schema sent along with each classification request.
///
/// `currency` is nullable so that strict structured output can still omit it;
/// a null currency means the receipt is already in ZAR.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "merchant": { "type": "string" },
            "total": { "type": "number" },
            "date": { "type": "string" },
            "currency": { "type": ["string", "null"] }
        },
        "required": ["name", "merchant", "total", "date", "currency"],
        "additionalProperties": false
    })
}

/// Wire shape of a classification response.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReceiptResponse {
    name: String,
    merchant: String,
    total: Number,
    date: String,
    #[serde(default)]
    currency: Option<String>,
}

/// Classifies receipt images into [`ReceiptRecord`]s.
///
/// Performs a single attempt per call; retries are the caller's decision.
#[derive(Clone)]
pub struct ReceiptClassifier {
    service: Arc<dyn ClassificationService>,
    timeout: Duration,
}

impl ReceiptClassifier {
    pub fn new(service: Arc<dyn ClassificationService>) -> Self {
        Self {
            service,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Classify one receipt image.
    pub async fn classify(&self, image: &ExtractedImage) -> Result<ReceiptRecord> {
        let schema = response_schema();

        let payload = match tokio::time::timeout(
            self.timeout,
            self.service.classify(image, &schema),
        )
        .await
        {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => return Err(SlipsError::Classification(e.to_string())),
            Err(_) => {
                return Err(SlipsError::Classification(format!(
                    "service did not answer within {:?}",
                    self.timeout
                )));
            }
        };

        interpret_response(payload)
    }
}

/// Validate a raw service payload and build the record.
pub fn interpret_response(payload: Value) -> Result<ReceiptRecord> {
    let response: ReceiptResponse = serde_json::from_value(payload)
        .map_err(|e| SlipsError::Classification(format!("response does not match schema: {}", e)))?;

    let merchant = response.merchant.trim();
    if merchant.is_empty() {
        return Err(SlipsError::Classification("merchant is empty".to_string()));
    }

    let date = parse_date(&response.date)?;
    let source_total = parse_total(&response.total)?;

    let currency = match response.currency.as_deref().map(str::trim) {
        None | Some("") => Currency::Zar,
        Some(code) => Currency::from_code(code)?,
    };
    let total = currency.to_zar(source_total)?;

    let canonical = canonical_name(merchant, date, total);
    validate_canonical_name(&canonical)?;

    let suggested = response.name.trim();
    if suggested != canonical {
        debug!("Service suggested {:?}, using {:?}", suggested, canonical);
    }

    Ok(ReceiptRecord {
        merchant: merchant.to_string(),
        date,
        source_total,
        currency,
        total,
        canonical_name: canonical,
        suggested_name: (!suggested.is_empty()).then(|| suggested.to_string()),
    })
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .ok_or_else(|| SlipsError::Classification(format!("date {:?} is not a calendar date", value)))
}

fn parse_total(total: &Number) -> Result<Decimal> {
    let text = total.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| SlipsError::Classification(format!("total {} is not an amount: {}", text, e)))
}
