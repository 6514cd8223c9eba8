// src/sink/alerts.rs
//
// Bounded in-memory alert history, newest last. Overflow shifts the oldest
// entry out.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::events::Alert;

const DEFAULT_LIMIT: usize = 1_000;

pub struct AlertsStore {
    buf:   RwLock<VecDeque<Alert>>,
    limit: usize,
}

impl AlertsStore {
    pub fn new(limit: usize) -> Self {
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
        Self {
            buf: RwLock::new(VecDeque::with_capacity(limit.min(1_024))),
            limit,
        }
    }

    pub fn add(&self, alert: Alert) {
        let mut buf = self.buf.write();
        if buf.len() >= self.limit {
            buf.pop_front();
        }
        buf.push_back(alert);
    }

    /// The most recent `limit` alerts, newest last. Zero means all.
    pub fn list(&self, limit: usize) -> Vec<Alert> {
        let buf = self.buf.read();
        let take = if limit == 0 || limit > buf.len() {
            buf.len()
        } else {
            limit
        };
        buf.iter().skip(buf.len() - take).cloned().collect()
    }

    /// All retained alerts at or after `ts`, oldest first.
    pub fn since(&self, ts: DateTime<Utc>) -> Vec<Alert> {
        self.buf
            .read()
            .iter()
            .filter(|a| a.timestamp >= ts)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buf.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.read().is_empty()
    }

    pub fn clear(&self) {
        self.buf.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AlertType, Severity, WindowMetrics};
    use chrono::Duration;
    use std::collections::HashMap;

    fn alert(reader: &str, ts: DateTime<Utc>) -> Alert {
        Alert {
            timestamp:  ts,
            reader_id:  reader.to_string(),
            severity:   Severity::Medium,
            alert_type: AlertType::PossibleBruteforce,
            window_sec: 1,
            metrics:    WindowMetrics::default(),
            score:      0.0,
            rules:      vec!["excessive_attempt_rate".to_string()],
            context:    HashMap::new(),
        }
    }

    #[test]
    fn overflow_shifts_oldest() {
        let store = AlertsStore::new(3);
        let base = Utc::now();
        for i in 0..5 {
            store.add(alert(&format!("r{i}"), base + Duration::seconds(i)));
        }
        let all = store.list(0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].reader_id, "r2");
        assert_eq!(all[2].reader_id, "r4");
    }

    #[test]
    fn list_limit_returns_newest() {
        let store = AlertsStore::new(10);
        let base = Utc::now();
        for i in 0..4 {
            store.add(alert(&format!("r{i}"), base + Duration::seconds(i)));
        }
        let two = store.list(2);
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].reader_id, "r2");
        assert_eq!(two[1].reader_id, "r3");
    }

    #[test]
    fn since_filters_by_timestamp() {
        let store = AlertsStore::new(10);
        let base = Utc::now();
        store.add(alert("old", base - Duration::seconds(10)));
        store.add(alert("new", base + Duration::seconds(10)));
        let recent = store.since(base);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].reader_id, "new");
    }
}
