// src/sink/metrics.rs
//
// Read-only observable sink: the last WindowMetrics per (reader, window)
// plus a last-updated instant per reader. Bounded by LRU eviction on the
// reader count — the least-recently-updated reader is dropped whole.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::events::WindowMetrics;

const DEFAULT_LIMIT: usize = 5_000;

pub struct MetricsStore {
    inner: RwLock<Inner>,
    limit: usize,
}

#[derive(Default)]
struct Inner {
    by_reader:  HashMap<String, BTreeMap<i64, WindowMetrics>>,
    updated_at: HashMap<String, DateTime<Utc>>,
}

impl MetricsStore {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            limit: if limit == 0 { DEFAULT_LIMIT } else { limit },
        }
    }

    pub fn update(&self, reader_id: &str, metrics: Vec<WindowMetrics>) {
        if reader_id.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        let per_window = inner.by_reader.entry(reader_id.to_string()).or_default();
        for wm in metrics {
            per_window.insert(wm.window_sec, wm);
        }
        inner.updated_at.insert(reader_id.to_string(), Utc::now());
        if inner.by_reader.len() > self.limit {
            evict_oldest(&mut inner);
        }
    }

    /// Last metrics for one reader, ascending by window, with the instant
    /// of the last update.
    pub fn get(&self, reader_id: &str) -> Option<(Vec<WindowMetrics>, DateTime<Utc>)> {
        let inner = self.inner.read();
        let per_window = inner.by_reader.get(reader_id)?;
        let updated = inner.updated_at.get(reader_id).copied().unwrap_or_default();
        Some((per_window.values().cloned().collect(), updated))
    }

    pub fn get_all(&self) -> HashMap<String, Vec<WindowMetrics>> {
        let inner = self.inner.read();
        inner
            .by_reader
            .iter()
            .map(|(reader, per_window)| {
                (reader.clone(), per_window.values().cloned().collect())
            })
            .collect()
    }

    pub fn reader_count(&self) -> usize {
        self.inner.read().by_reader.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_reader.clear();
        inner.updated_at.clear();
    }
}

fn evict_oldest(inner: &mut Inner) {
    let oldest = inner
        .updated_at
        .iter()
        .min_by_key(|(_, ts)| **ts)
        .map(|(reader, _)| reader.clone());
    if let Some(reader) = oldest {
        inner.by_reader.remove(&reader);
        inner.updated_at.remove(&reader);
    }
}
