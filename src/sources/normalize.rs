//! Close-time normalization for source payloads.
//!
//! Accepted inputs:
//! - epoch seconds as a number or a digit-only string
//! - epoch milliseconds, recognized by a value above 10^12
//! - RFC 3339 / ISO-8601 strings, with or without offset (no offset means UTC)
//! - plain dates (`YYYY-MM-DD`), taken as midnight UTC
//!
//! Output is an RFC 3339 string in UTC. Anything else normalizes to `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

pub fn normalize_close_time(value: &Value) -> Option<String> {
    let normalized = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .and_then(from_epoch),
        Value::String(s) => parse_str(s.trim()),
        _ => None,
    };

    if normalized.is_none() && !value.is_null() {
        log::debug!("close time {value} could not be parsed");
    }
    normalized.map(|dt| dt.to_rfc3339())
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn parse_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_epoch_seconds_and_millis() {
        let expected = Some("2024-01-01T00:00:00+00:00".to_string());
        assert_eq!(normalize_close_time(&json!(1704067200)), expected);
        assert_eq!(normalize_close_time(&json!(1704067200000i64)), expected);
        assert_eq!(normalize_close_time(&json!("1704067200")), expected);
        assert_eq!(normalize_close_time(&json!(1704067200.7)), expected);
    }

    #[test]
    fn test_iso_strings() {
        assert_eq!(
            normalize_close_time(&json!("2024-06-30T12:00:00Z")),
            Some("2024-06-30T12:00:00+00:00".to_string())
        );
        assert_eq!(
            normalize_close_time(&json!("2024-06-30T14:00:00+02:00")),
            Some("2024-06-30T12:00:00+00:00".to_string())
        );
        assert_eq!(
            normalize_close_time(&json!("2024-06-30T12:00:00")),
            Some("2024-06-30T12:00:00+00:00".to_string())
        );
        assert_eq!(
            normalize_close_time(&json!("2024-06-30")),
            Some("2024-06-30T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_unparseable_is_none() {
        assert_eq!(normalize_close_time(&json!(null)), None);
        assert_eq!(normalize_close_time(&json!("soon")), None);
        assert_eq!(normalize_close_time(&json!("")), None);
        assert_eq!(normalize_close_time(&json!({"at": 1})), None);
        assert_eq!(normalize_close_time(&json!(true)), None);
    }
}
