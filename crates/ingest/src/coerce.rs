use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ledger_core::Tags;
use ledger_db::FieldValue;
use rust_decimal::Decimal;

use crate::columns::ColumnType;

const LABEL_PREFIX: &str = "label_";

/// Coerce one report field. `None` means the value was present but did not
/// fit the declared type; blank fields are a plain `Null`.
pub fn coerce_field(kind: ColumnType, raw: &str) -> Option<FieldValue> {
    let value = raw.trim();
    if value.is_empty() {
        return Some(match kind {
            ColumnType::Labels => FieldValue::Json(Tags::new()),
            _ => FieldValue::Null,
        });
    }
    match kind {
        ColumnType::Text => Some(FieldValue::Text(value.to_string())),
        ColumnType::Decimal => parse_decimal(value).map(FieldValue::Decimal),
        ColumnType::Integer => value.parse::<i64>().ok().map(FieldValue::Integer),
        ColumnType::Timestamp => parse_timestamp(value).map(FieldValue::Timestamp),
        ColumnType::Date => parse_date(value).map(FieldValue::Date),
        ColumnType::Labels => parse_labels(value).map(FieldValue::Json),
    }
}

pub fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let trimmed = value.strip_suffix(" UTC").unwrap_or(value);
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S %z") {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc());
        }
    }
    parse_date(trimmed)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y"]
        .into_iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Parse a label map in either JSON form or the `label_k:v|label_k2:v2`
/// form. Keys lose a leading `label_`.
pub fn parse_labels(value: &str) -> Option<Tags> {
    let value = value.trim();
    if value.starts_with('{') || value.starts_with('"') {
        let object = if value.starts_with('{') {
            value.to_string()
        } else {
            format!("{{{value}}}")
        };
        let parsed: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&object).ok()?;
        return Some(
            parsed
                .into_iter()
                .map(|(key, value)| {
                    let text = match value {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    (strip_label_prefix(&key), text)
                })
                .collect(),
        );
    }
    let mut labels = Tags::new();
    for pair in value.split('|').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once(':')?;
        labels.insert(strip_label_prefix(key.trim()), value.trim().to_string());
    }
    Some(labels)
}

fn strip_label_prefix(key: &str) -> String {
    key.strip_prefix(LABEL_PREFIX).unwrap_or(key).to_string()
}
