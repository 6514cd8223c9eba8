// src/events.rs
//
// Shared domain types flowing through RFGuard: the normalized event every
// ingester produces, the per-window metrics snapshot, and the alert record.
// Everything here crosses a boundary (queue, sink, storage), so everything
// carries serde derives. Timestamps are UTC and serialize as RFC3339.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Authentication outcome ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthResult {
    Success,
    Failure,
}

impl AuthResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl Default for AuthResult {
    fn default() -> Self {
        Self::Success
    }
}

impl std::fmt::Display for AuthResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Normalized event ──────────────────────────────────────────────────────────

/// The common schema every ingest source is reduced to before the engine
/// sees it. `timestamp` is `None` when the source carried no usable time;
/// the engine substitutes its own wall clock during clamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp:  Option<DateTime<Utc>>,
    pub reader_id:  String,
    #[serde(default)]
    pub uid:        String,
    #[serde(default)]
    pub result:     AuthResult,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub source:     String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw:        String,
}

// ── Window metrics ────────────────────────────────────────────────────────────

/// Snapshot of one rolling window after one update.
///
/// `aps` = attempts per second, `fr` = failure ratio, `uds` = unique-UID
/// diversity (distinct UIDs / attempts), `tv` = variance of inter-arrival
/// gaps in seconds².
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub window_sec: i64,
    pub attempts:   u64,
    pub failures:   u64,
    pub aps:        f64,
    pub fr:         f64,
    pub uds:        f64,
    pub tv:         f64,
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium   => write!(f, "medium"),
            Self::High     => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PossibleBruteforce,
    BlacklistedUid,
    WhitelistViolation,
    RepeatedAuthFailure,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PossibleBruteforce  => write!(f, "possible_bruteforce"),
            Self::BlacklistedUid      => write!(f, "blacklisted_uid"),
            Self::WhitelistViolation  => write!(f, "whitelist_violation"),
            Self::RepeatedAuthFailure => write!(f, "repeated_auth_failure"),
        }
    }
}

/// One emitted alert. `window_sec` is 0 and `metrics` is zeroed for alerts
/// that do not originate from a window (access-control, repeated failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp:  DateTime<Utc>,
    pub reader_id:  String,
    pub severity:   Severity,
    pub alert_type: AlertType,
    pub window_sec: i64,
    pub metrics:    WindowMetrics,
    pub score:      f64,
    pub rules:      Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context:    HashMap<String, String>,
}
