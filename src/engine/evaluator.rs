// src/engine/evaluator.rs
//
// Alert evaluation: the window threshold rules with the weighted composite
// score, the access-control rules, and the repeated-failure streak rule.
// Every emission passes a cooldown gate keyed so that repeats of the same
// situation share one slot.

use std::collections::HashMap;

use chrono::Utc;

use crate::config::{duration_from_secs, DetectionConfig};
use crate::engine::access::normalize_uid;
use crate::engine::{Engine, Snapshot};
use crate::events::{Alert, AlertType, AuthResult, NormalizedEvent, Severity, WindowMetrics};
use crate::state::reader::ReaderState;

impl Engine {
    /// Threshold rules plus the composite score over one window snapshot.
    /// Rule order is fixed; it is part of the alert contract.
    pub(crate) fn evaluate_window(
        &self,
        det: &DetectionConfig,
        reader_id: &str,
        wm: &WindowMetrics,
    ) -> Option<Alert> {
        if wm.attempts == 0 {
            return None;
        }
        let mut rules: Vec<String> = Vec::new();
        if wm.aps > det.aps_threshold {
            rules.push("excessive_attempt_rate".to_string());
        }
        if wm.fr > det.failure_ratio_threshold && wm.attempts >= det.min_attempts {
            rules.push("failure_spike".to_string());
        }
        if wm.uds > det.uid_diversity_threshold && wm.aps > det.aps_elevated_threshold {
            rules.push("uid_spraying".to_string());
        }
        if wm.tv < det.timing_variance_threshold && wm.aps > det.aps_elevated_threshold {
            rules.push("machine_timing".to_string());
        }

        let score = det.weights.aps * wm.aps
            + det.weights.fr * wm.fr
            + det.weights.uds * wm.uds
            + det.weights.tv * (1.0 / (wm.tv + det.epsilon));
        if score > det.attack_score_threshold
            && wm.attempts >= det.min_attempts
            && wm.aps > det.aps_elevated_threshold
        {
            rules.push("attack_score".to_string());
        }
        if rules.is_empty() {
            return None;
        }
        if !self.cooldown.allow_window(
            reader_id,
            wm.window_sec,
            duration_from_secs(det.alert_cooldown),
        ) {
            return None;
        }

        let severity = if score > det.attack_score_threshold * 2.0
            || wm.aps > det.aps_threshold * 2.0
        {
            Severity::Critical
        } else if score > det.attack_score_threshold || rules.len() >= 2 {
            Severity::High
        } else {
            Severity::Medium
        };

        Some(Alert {
            timestamp:  Utc::now(),
            reader_id:  reader_id.to_string(),
            severity,
            alert_type: AlertType::PossibleBruteforce,
            window_sec: wm.window_sec,
            metrics:    wm.clone(),
            score,
            rules,
            context:    HashMap::from([("engine".to_string(), "rfguard".to_string())]),
        })
    }

    /// Blacklist and whitelist-only checks. Blacklist takes precedence;
    /// both share the `<reader>|0` cooldown slot, so a reader alternating
    /// between the two still emits at most once per cooldown.
    pub(crate) fn evaluate_access(&self, snap: &Snapshot, ev: &NormalizedEvent) -> Option<Alert> {
        let access = &snap.access;
        if !access.enabled() || ev.uid.is_empty() {
            return None;
        }
        let uid = normalize_uid(&ev.uid);
        if uid.is_empty() {
            return None;
        }
        let cooldown = duration_from_secs(snap.config.detection.alert_cooldown);
        if access.is_blacklisted(&ev.reader_id, &uid) {
            if !self.cooldown.allow_window(&ev.reader_id, 0, cooldown) {
                return None;
            }
            return Some(context_alert(
                ev,
                &uid,
                Severity::Critical,
                AlertType::BlacklistedUid,
                "blacklisted_uid",
            ));
        }
        if access.whitelist_only() && !access.is_whitelisted(&ev.reader_id, &uid) {
            if !self.cooldown.allow_window(&ev.reader_id, 0, cooldown) {
                return None;
            }
            return Some(context_alert(
                ev,
                &uid,
                Severity::High,
                AlertType::WhitelistViolation,
                "whitelist_violation",
            ));
        }
        None
    }

    /// Consecutive-failure tracking per (reader, uid). The streak is not
    /// reset on emission — it keeps counting until a non-failure or
    /// empty-error-code event for that UID clears it.
    pub(crate) fn evaluate_auth_streak(
        &self,
        det: &DetectionConfig,
        reader: &mut ReaderState,
        ev: &NormalizedEvent,
    ) -> Option<Alert> {
        if ev.uid.is_empty() {
            return None;
        }
        let uid = normalize_uid(&ev.uid);
        if uid.is_empty() {
            return None;
        }
        if ev.result != AuthResult::Failure || ev.error_code.is_empty() {
            reader.reset_streak(&uid);
            return None;
        }
        if reader.bump_streak(&uid) < 2 {
            return None;
        }
        let key = format!("authfail|{}|{}", reader.id(), uid);
        if !self.cooldown.allow(&key, duration_from_secs(det.alert_cooldown)) {
            return None;
        }
        let mut alert = context_alert(
            ev,
            &uid,
            Severity::Medium,
            AlertType::RepeatedAuthFailure,
            "repeated_auth_failure",
        );
        alert.reader_id = reader.id().to_string();
        Some(alert)
    }
}

/// Non-window alert carrying the event's identity in context.
/// `window_sec` is 0 and the metrics snapshot is zeroed.
fn context_alert(
    ev: &NormalizedEvent,
    uid: &str,
    severity: Severity,
    alert_type: AlertType,
    rule: &str,
) -> Alert {
    Alert {
        timestamp:  Utc::now(),
        reader_id:  ev.reader_id.clone(),
        severity,
        alert_type,
        window_sec: 0,
        metrics:    WindowMetrics::default(),
        score:      0.0,
        rules:      vec![rule.to_string()],
        context:    HashMap::from([
            ("uid".to_string(), uid.to_string()),
            ("uid_raw".to_string(), ev.uid.clone()),
            ("source".to_string(), ev.source.clone()),
            ("result".to_string(), ev.result.as_str().to_string()),
            ("error_code".to_string(), ev.error_code.clone()),
        ]),
    }
}
