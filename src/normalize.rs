// src/normalize.rs
//
// Reduction of a parsed field bundle into the common event schema. Readers
// in the field emit wildly inconsistent timestamps and result vocabularies;
// everything funnels through here before the engine sees it.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

use crate::config::Config;
use crate::events::{AuthResult, NormalizedEvent};

/// Raw string fields extracted by the line parser, before any
/// interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    pub timestamp:  String,
    pub reader_id:  String,
    pub uid:        String,
    pub result:     String,
    pub error_code: String,
    pub extras:     HashMap<String, String>,
    pub raw:        String,
}

pub fn normalize(fields: RawFields, cfg: &Config) -> Result<NormalizedEvent> {
    let reader = fields.reader_id.trim();
    let reader_id = if reader.is_empty() {
        cfg.ingest.default_reader_id.clone()
    } else {
        reader.to_string()
    };

    let timestamp = if fields.timestamp.trim().is_empty() {
        Utc::now()
    } else {
        parse_timestamp(&fields.timestamp).context("parse timestamp")?
    };

    let error_code = fields.error_code.trim().to_string();
    let result = parse_result(&fields.result, &error_code);

    Ok(NormalizedEvent {
        timestamp: Some(timestamp),
        reader_id,
        uid: fields.uid.trim().to_string(),
        result,
        error_code,
        source: "log".to_string(),
        raw: fields.raw,
    })
}

/// Map the result vocabulary onto success/failure. An unknown word with a
/// non-empty error code counts as failure.
pub fn parse_result(result: &str, error_code: &str) -> AuthResult {
    match result.trim().to_lowercase().as_str() {
        "ok" | "success" | "allow" | "allowed" | "granted" | "pass" => AuthResult::Success,
        "fail" | "failure" | "denied" | "reject" | "rejected" | "timeout" | "error" => {
            AuthResult::Failure
        }
        _ if !error_code.trim().is_empty() => AuthResult::Failure,
        _ => AuthResult::Success,
    }
}

/// Accepted formats: RFC3339 (any precision, any offset), space- or
/// T-separated naive datetimes (taken as UTC), syslog `Mon D HH:MM:SS`
/// (assigned the current year), and unix seconds or milliseconds.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        bail!("empty timestamp");
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        return parse_unix(value);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return Ok(naive.and_utc());
        }
    }
    for layout in ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, layout) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    let with_year = format!("{} {}", Utc::now().year(), value);
    if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    bail!("unsupported timestamp format: {value:?}")
}

fn parse_unix(value: &str) -> Result<DateTime<Utc>> {
    // 13+ digits is millisecond precision
    if value.len() >= 13 {
        let ms: i64 = value.parse()?;
        return Utc
            .timestamp_millis_opt(ms)
            .single()
            .context("unix millisecond timestamp out of range");
    }
    let secs: i64 = value.parse()?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .context("unix timestamp out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn timestamp_formats() {
        for value in [
            "2025-03-01T10:20:30Z",
            "2025-03-01T10:20:30.123456789Z",
            "2025-03-01T10:20:30+02:00",
            "2025-03-01 10:20:30",
            "2025-03-01 10:20:30.500",
            "2025-03-01T10:20:30",
        ] {
            let dt = parse_timestamp(value).unwrap();
            assert_eq!(dt.date_naive().to_string(), "2025-03-01", "value {value}");
        }
        assert!(parse_timestamp("not a time").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn syslog_timestamp_gets_current_year() {
        let dt = parse_timestamp("Mar  1 10:20:30").unwrap();
        assert_eq!(dt.year(), Utc::now().year());
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn unix_seconds_and_millis() {
        assert_eq!(
            parse_timestamp("1700000000").unwrap(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("1700000000123").unwrap(),
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
        );
    }

    #[test]
    fn result_keywords() {
        assert_eq!(parse_result("GRANTED", ""), AuthResult::Success);
        assert_eq!(parse_result("denied", ""), AuthResult::Failure);
        assert_eq!(parse_result("timeout", ""), AuthResult::Failure);
        // unknown word, error code decides
        assert_eq!(parse_result("weird", "E42"), AuthResult::Failure);
        assert_eq!(parse_result("weird", ""), AuthResult::Success);
        assert_eq!(parse_result("", ""), AuthResult::Success);
    }

    #[test]
    fn empty_reader_takes_configured_default() {
        let cfg = Config::default();
        let ev = normalize(
            RawFields { uid: " AABBCC ".into(), ..Default::default() },
            &cfg,
        )
        .unwrap();
        assert_eq!(ev.reader_id, "unknown");
        assert_eq!(ev.uid, "AABBCC");
        assert!(ev.timestamp.is_some());
    }
}
