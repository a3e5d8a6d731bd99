//! Lenient parsing of model output
//!
//! Models wrap their JSON in prose or markdown fences, and write amounts as
//! numbers or as strings in local formats (`"25,40"`, `"₺1.234,56"`).

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::input::parse_amount;
use crate::models::{Confidence, ExtractedFields};

/// Date layouts printed on receipts, ISO first
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%y"];

/// Fields the extraction prompt asks for. Alternative key names seen in the
/// wild are accepted as aliases.
#[derive(Debug, Default, Deserialize)]
struct RawReceiptFields {
    #[serde(default, alias = "merchant", alias = "store", alias = "store_name")]
    merchant_name: Option<String>,
    #[serde(default, alias = "total", alias = "amount", alias = "toplam")]
    total_amount: Option<Value>,
    #[serde(default, alias = "currency_code")]
    currency: Option<String>,
    #[serde(default, alias = "receipt_date", alias = "tarih")]
    date: Option<String>,
    #[serde(default, alias = "confidence_level")]
    confidence: Option<Value>,
}

/// Return the outermost `{...}` span of a response
fn json_span(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

fn truncate(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Interpret a JSON amount that may be a number or a formatted string
pub fn amount_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s).map(|a| a.value),
        _ => None,
    }
}

/// Parse a receipt date in any of the common printed layouts
pub fn parse_receipt_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
}

fn confidence_from_value(value: &Value) -> Option<Confidence> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64().and_then(Confidence::from_score),
        _ => None,
    }
}

/// Parse receipt fields out of a model response
pub fn parse_extracted_fields(response: &str) -> Result<ExtractedFields> {
    let response = response.trim();
    let json_str = json_span(response).ok_or_else(|| {
        Error::Extraction(format!(
            "No JSON found in extraction response | Raw: {}",
            truncate(response)
        ))
    })?;

    let raw: RawReceiptFields = serde_json::from_str(json_str).map_err(|e| {
        Error::Extraction(format!(
            "Invalid extraction JSON: {} | Raw: {}",
            e,
            truncate(json_str)
        ))
    })?;

    // A currency written inside a string amount ("₺25,40") counts as a hint
    let amount_hint = match &raw.total_amount {
        Some(Value::String(s)) => parse_amount(s).and_then(|a| a.currency_hint),
        _ => None,
    };

    Ok(ExtractedFields {
        amount: raw.total_amount.as_ref().and_then(amount_from_value),
        merchant: raw.merchant_name,
        currency_hint: raw.currency.or(amount_hint),
        receipt_date: raw.date.as_deref().and_then(parse_receipt_date),
        confidence: raw.confidence.as_ref().and_then(confidence_from_value),
    }
    .sanitized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_json_wrapped_in_prose() {
        let response = r#"Here is the data:
```json
{"merchant_name": "Migros", "total_amount": 250.0, "currency": "TRY"}
```"#;
        let fields = parse_extracted_fields(response).unwrap();
        assert_eq!(fields.amount, Some(250.0));
        assert_eq!(fields.merchant.as_deref(), Some("Migros"));
        assert_eq!(fields.currency_hint.as_deref(), Some("TRY"));
    }

    #[test]
    fn test_string_amount_in_turkish_format() {
        let fields =
            parse_extracted_fields(r#"{"merchant": "A101", "total": "₺1.234,56"}"#).unwrap();
        assert_eq!(fields.amount, Some(1234.56));
        assert_eq!(fields.currency_hint.as_deref(), Some("₺"));
    }

    #[test]
    fn test_missing_and_null_fields_are_none() {
        let fields =
            parse_extracted_fields(r#"{"merchant_name": null, "total_amount": null}"#).unwrap();
        assert!(fields.is_empty());

        let fields = parse_extracted_fields(r#"{"total_amount": 0}"#).unwrap();
        assert!(fields.amount.is_none());
    }

    #[test]
    fn test_date_and_confidence() {
        let fields = parse_extracted_fields(
            r#"{"merchant_name": "BIM", "total_amount": 42.5, "date": "28.06.2025", "confidence": "high"}"#,
        )
        .unwrap();
        assert_eq!(fields.receipt_date, NaiveDate::from_ymd_opt(2025, 6, 28));
        assert_eq!(fields.confidence, Some(Confidence::High));

        let fields =
            parse_extracted_fields(r#"{"total": 10, "date": "2025-06-28", "confidence": 0.3}"#)
                .unwrap();
        assert_eq!(fields.receipt_date, NaiveDate::from_ymd_opt(2025, 6, 28));
        assert_eq!(fields.confidence, Some(Confidence::Low));

        let fields =
            parse_extracted_fields(r#"{"total": 10, "date": "yesterday", "confidence": "sure"}"#)
                .unwrap();
        assert!(fields.receipt_date.is_none());
        assert!(fields.confidence.is_none());
    }

    #[test]
    fn test_no_json_is_extraction_error() {
        assert!(matches!(
            parse_extracted_fields("I could not read this receipt."),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            parse_extracted_fields("{not json}"),
            Err(Error::Extraction(_))
        ));
    }
}
