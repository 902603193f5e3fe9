//! Canonical naming of classified receipts.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::patterns::{APOSTROPHES, CANONICAL_NAME, SLUG_SEPARATOR};
use crate::error::{Result, SlipsError};
use crate::models::receipt::ReceiptRecord;
use crate::pdf::ImageEncoding;

/// Lowercase, hyphen-separated merchant slug ("Pick n Pay" -> "pick-n-pay").
pub fn slugify_merchant(merchant: &str) -> String {
    let lowered = merchant.trim().to_lowercase();
    let without_apostrophes = APOSTROPHES.replace_all(&lowered, "");
    SLUG_SEPARATOR
        .replace_all(&without_apostrophes, "-")
        .trim_matches('-')
        .to_string()
}

/// Build a canonical name from its parts. The result is not validated.
pub fn canonical_name(merchant: &str, date: NaiveDate, total_zar: Decimal) -> String {
    format!(
        "{}_{}_{:.2}zar",
        slugify_merchant(merchant),
        date.format("%Y-%m-%d"),
        total_zar
    )
}

/// Check a name against the canonical grammar.
pub fn validate_canonical_name(name: &str) -> Result<&str> {
    if CANONICAL_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(SlipsError::InvalidName(name.to_string()))
    }
}

/// Turns a classified record into the file name used for upload.
#[derive(Debug, Clone, Default)]
pub struct NameFormatter;

impl NameFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Re-validate the record's canonical name and append the image extension.
    pub fn format(&self, record: &ReceiptRecord, encoding: ImageEncoding) -> Result<String> {
        let name = validate_canonical_name(&record.canonical_name)?;
        Ok(format!("{}.{}", name, encoding.extension()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::Currency;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(canonical_name: &str) -> ReceiptRecord {
        ReceiptRecord {
            merchant: "Checkers".to_string(),
            date: date(2025, 1, 31),
            source_total: Decimal::from(10),
            currency: Currency::Zar,
            total: Decimal::from(10),
            canonical_name: canonical_name.to_string(),
            suggested_name: None,
        }
    }

    #[test]
    fn test_slugify_merchant() {
        assert_eq!(slugify_merchant("Pick n Pay"), "pick-n-pay");
        assert_eq!(slugify_merchant("  WOOLWORTHS  "), "woolworths");
        assert_eq!(slugify_merchant("Nando's"), "nandos");
        assert_eq!(slugify_merchant("Hussar Grill - Rondebosch"), "hussar-grill-rondebosch");
        assert_eq!(slugify_merchant("7-Eleven"), "7-eleven");
        assert_eq!(slugify_merchant("!!!"), "");
    }

    #[test]
    fn test_canonical_name() {
        let total = Decimal::from_str("1336.37").unwrap();
        assert_eq!(
            canonical_name("Pick n Pay", date(2025, 3, 31), total),
            "pick-n-pay_2025-03-31_1336.37zar"
        );
        assert_eq!(
            canonical_name("Checkers", date(2025, 1, 31), Decimal::from(10)),
            "checkers_2025-01-31_10.00zar"
        );
    }

    #[test]
    fn test_grammar_accepts_examples() {
        for name in [
            "pick-n-pay_2025-03-31_1336.37zar",
            "checkers_2025-01-31_10.00zar",
            "hussar-gril_2025-02-28_998.09zar",
        ] {
            assert_eq!(validate_canonical_name(name).unwrap(), name);
        }
    }

    #[test]
    fn test_grammar_rejects() {
        for name in [
            "Checkers_2025-01-31_10.00zar",
            "checkers_2025-01-31_10.0zar",
            "checkers_2025-01-31_1,000.00zar",
            "checkers_2025-1-31_10.00zar",
            "checkers_2025-01-31_10.00ZAR",
            "checkers_2025-01-31_10.00usd",
            "check--ers_2025-01-31_10.00zar",
            "-checkers_2025-01-31_10.00zar",
            "_2025-01-31_10.00zar",
            "checkers_2025-01-31_-10.00zar",
            "checkers_2025-01-31_10.00zar\n",
            "checkers_２０２５-01-31_10.00zar",
        ] {
            let err = validate_canonical_name(name).unwrap_err();
            assert!(matches!(err, SlipsError::InvalidName(_)), "{:?}", name);
        }
    }

    #[test]
    fn test_validation_is_idempotent() {
        let name = "pick-n-pay_2025-03-31_1336.37zar";
        let once = validate_canonical_name(name).unwrap();
        let twice = validate_canonical_name(once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_format_appends_extension() {
        let formatter = NameFormatter::new();
        let rec = record("checkers_2025-01-31_10.00zar");

        assert_eq!(
            formatter.format(&rec, ImageEncoding::Jpeg).unwrap(),
            "checkers_2025-01-31_10.00zar.jpg"
        );
        assert_eq!(
            formatter.format(&rec, ImageEncoding::Png).unwrap(),
            "checkers_2025-01-31_10.00zar.png"
        );
    }

    #[test]
    fn test_format_rejects_invalid_record() {
        let err = NameFormatter::new()
            .format(&record("Checkers 31 Jan"), ImageEncoding::Jpeg)
            .unwrap_err();
        assert!(matches!(err, SlipsError::InvalidName(_)));
    }
}
