// src/parser.rs
//
// Line-oriented parser for the formats access-control readers actually
// emit: JSON objects, CSV (with or without a header row), and free-form
// `key=value` text with a leading timestamp. One parser instance per
// stream — the learned CSV header is stream state.

use std::collections::HashMap;

use regex::Regex;

use crate::normalize::RawFields;

const READER_KEYS: &[&str] = &["reader_id", "reader", "readerid", "device", "terminal"];
const UID_KEYS:    &[&str] = &["uid", "card", "card_id", "cardid"];
const RESULT_KEYS: &[&str] = &["result", "status", "outcome"];
const ERROR_KEYS:  &[&str] = &["error", "error_code", "err"];
const TS_KEYS:     &[&str] = &["timestamp", "time", "ts"];

pub struct LineParser {
    csv_header:   Option<Vec<String>>,
    re_timestamp: Regex,
    re_kv:        Regex,
    re_syslog_ts: Regex,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            csv_header:   None,
            re_timestamp: Regex::new(r"^\s*([0-9]{4}-[0-9]{2}-[0-9]{2}[ T][0-9:.+Z-]+)")
                .expect("timestamp regex"),
            re_kv:        Regex::new(r"([A-Za-z_]+)=(\S+)").expect("key=value regex"),
            re_syslog_ts: Regex::new(r"^\s*([A-Za-z]{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})")
                .expect("syslog timestamp regex"),
        }
    }

    /// Returns `None` for blank lines and learned CSV header rows.
    pub fn parse_line(&mut self, line: &str) -> Option<RawFields> {
        let trim = line.trim();
        if trim.is_empty() {
            return None;
        }
        if looks_like_json(trim) {
            if let Some(mut fields) = parse_json(trim) {
                fields.raw = line.to_string();
                return Some(fields);
            }
        }
        if trim.contains(',') {
            let mut fields = self.parse_csv(trim)?;
            fields.raw = line.to_string();
            return Some(fields);
        }
        let mut fields = self.parse_plain(trim);
        fields.raw = line.to_string();
        Some(fields)
    }

    fn parse_csv(&mut self, line: &str) -> Option<RawFields> {
        let record: Vec<&str> = line.split(',').map(str::trim).collect();
        if self.csv_header.is_none() && looks_like_header(&record) {
            self.csv_header = Some(record.iter().map(|v| v.to_lowercase()).collect());
            return None;
        }
        let mut fields = RawFields::default();
        match &self.csv_header {
            Some(header) => {
                for (name, value) in header.iter().zip(&record) {
                    assign_field(&mut fields, name, value);
                }
            }
            None => {
                // positional fallback: timestamp, reader, uid, result, error
                let mut cols = record.iter();
                if let Some(v) = cols.next() {
                    fields.timestamp = v.to_string();
                }
                if let Some(v) = cols.next() {
                    fields.reader_id = v.to_string();
                }
                if let Some(v) = cols.next() {
                    fields.uid = v.to_string();
                }
                if let Some(v) = cols.next() {
                    fields.result = v.to_string();
                }
                if let Some(v) = cols.next() {
                    fields.error_code = v.to_string();
                }
            }
        }
        Some(fields)
    }

    fn parse_plain(&self, line: &str) -> RawFields {
        let (timestamp, rest) = self.extract_timestamp(line);
        let mut extras = HashMap::new();
        for cap in self.re_kv.captures_iter(line) {
            extras.insert(cap[1].to_lowercase(), cap[2].to_string());
        }
        let mut fields = RawFields {
            timestamp,
            reader_id: first_non_empty(&extras, READER_KEYS),
            uid: first_non_empty(&extras, UID_KEYS),
            result: first_non_empty(&extras, RESULT_KEYS),
            error_code: first_non_empty(&extras, ERROR_KEYS),
            extras,
            raw: String::new(),
        };
        if fields.reader_id.is_empty() {
            if let Some(token) = rest.split_whitespace().next() {
                fields.reader_id = token.to_string();
            }
        }
        fields
    }

    fn extract_timestamp(&self, line: &str) -> (String, String) {
        for re in [&self.re_timestamp, &self.re_syslog_ts] {
            if let Some(m) = re.captures(line).and_then(|c| c.get(1)) {
                let rest = line[m.end()..].trim().to_string();
                return (m.as_str().trim().to_string(), rest);
            }
        }
        (String::new(), line.to_string())
    }
}

fn looks_like_json(s: &str) -> bool {
    matches!(s.trim_start().chars().next(), Some('{') | Some('['))
}

fn parse_json(line: &str) -> Option<RawFields> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;
    let mut extras = HashMap::new();
    for (key, val) in obj {
        let text = match val {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        extras.insert(key.to_lowercase(), text);
    }
    Some(RawFields {
        timestamp: first_non_empty(&extras, TS_KEYS),
        reader_id: first_non_empty(&extras, READER_KEYS),
        uid: first_non_empty(&extras, UID_KEYS),
        result: first_non_empty(&extras, RESULT_KEYS),
        error_code: first_non_empty(&extras, ERROR_KEYS),
        extras,
        raw: String::new(),
    })
}

fn looks_like_header(record: &[&str]) -> bool {
    record.iter().any(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "timestamp"
                | "time"
                | "ts"
                | "reader"
                | "reader_id"
                | "uid"
                | "card"
                | "result"
                | "status"
                | "error"
                | "error_code"
        )
    })
}

fn assign_field(fields: &mut RawFields, name: &str, value: &str) {
    let value = value.trim();
    match name {
        "timestamp" | "time" | "ts" => fields.timestamp = value.to_string(),
        "reader" | "reader_id" | "readerid" | "device" | "terminal" => {
            fields.reader_id = value.to_string()
        }
        "uid" | "card" | "card_id" | "cardid" => fields.uid = value.to_string(),
        "result" | "status" | "outcome" => fields.result = value.to_string(),
        "error" | "error_code" | "err" => fields.error_code = value.to_string(),
        _ => {
            fields.extras.insert(name.to_string(), value.to_string());
        }
    }
}

fn first_non_empty(map: &HashMap<String, String>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line() {
        let mut parser = LineParser::new();
        let fields = parser
            .parse_line(r#"{"timestamp":"2025-03-01T10:20:30Z","reader":"door-01","uid":"AABBCC","result":"denied","error":"AUTH_FAIL"}"#)
            .unwrap();
        assert_eq!(fields.timestamp, "2025-03-01T10:20:30Z");
        assert_eq!(fields.reader_id, "door-01");
        assert_eq!(fields.uid, "AABBCC");
        assert_eq!(fields.result, "denied");
        assert_eq!(fields.error_code, "AUTH_FAIL");
    }

    #[test]
    fn json_alternate_keys() {
        let mut parser = LineParser::new();
        let fields = parser
            .parse_line(r#"{"ts":"1700000000","terminal":"gate2","card":"00FF00","status":"ok"}"#)
            .unwrap();
        assert_eq!(fields.timestamp, "1700000000");
        assert_eq!(fields.reader_id, "gate2");
        assert_eq!(fields.uid, "00FF00");
    }

    #[test]
    fn csv_with_header() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("timestamp,reader,uid,result,error").is_none());
        let fields = parser
            .parse_line("2025-03-01 10:20:30,door-01,AABBCC,denied,AUTH_FAIL")
            .unwrap();
        assert_eq!(fields.reader_id, "door-01");
        assert_eq!(fields.error_code, "AUTH_FAIL");
    }

    #[test]
    fn csv_positional() {
        let mut parser = LineParser::new();
        let fields = parser
            .parse_line("2025-03-01 10:20:30,door-01,AABBCC,granted")
            .unwrap();
        assert_eq!(fields.timestamp, "2025-03-01 10:20:30");
        assert_eq!(fields.uid, "AABBCC");
        assert_eq!(fields.result, "granted");
        assert_eq!(fields.error_code, "");
    }

    #[test]
    fn key_value_line() {
        let mut parser = LineParser::new();
        let fields = parser
            .parse_line("2025-03-01 10:20:30 reader=door-01 uid=AABBCC result=denied error=AUTH_FAIL")
            .unwrap();
        assert_eq!(fields.timestamp, "2025-03-01 10:20:30");
        assert_eq!(fields.reader_id, "door-01");
        assert_eq!(fields.result, "denied");
    }

    #[test]
    fn syslog_line_first_token_becomes_reader() {
        let mut parser = LineParser::new();
        let fields = parser
            .parse_line("Mar  1 10:20:30 door-01 card read uid=AABBCC")
            .unwrap();
        assert_eq!(fields.timestamp, "Mar  1 10:20:30");
        assert_eq!(fields.reader_id, "door-01");
        assert_eq!(fields.uid, "AABBCC");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("   ").is_none());
        assert!(parser.parse_line("").is_none());
    }
}
