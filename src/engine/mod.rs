// src/engine/mod.rs
//
// The detection engine. One logical consumer calls `process` per event;
// everything else (config reload, reset, sink readers) touches the engine
// through atomic snapshot swaps or its own lock.
//
// Pipeline per event, in fixed order:
//   clamp timestamp → dedupe → access-control check → reader lookup →
//   failure-streak check → window fan-out (ascending window_sec) →
//   metrics publication.
//
// Storage forwarding is fire-and-forget: the detector's source of truth is
// the input stream, so a failed save logs at warn and never rolls back
// engine state.

pub mod access;
pub mod cooldown;
pub mod dedupe;
mod evaluator;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::config::{duration_from_secs, Config};
use crate::events::{Alert, NormalizedEvent};
use crate::sink::alerts::AlertsStore;
use crate::sink::metrics::MetricsStore;
use crate::state::reader::ReaderState;
use crate::state::window::EventEntry;
use crate::storage::Store;

use access::AccessControlIndex;
use cooldown::Cooldown;
use dedupe::DedupeCache;

/// Config plus the access index derived from it, published as one unit so
/// an event can never observe a half-swapped pair.
pub(crate) struct Snapshot {
    pub config: Arc<Config>,
    pub access: AccessControlIndex,
}

impl Snapshot {
    fn build(config: Arc<Config>) -> Self {
        let access = AccessControlIndex::build(&config.access_control);
        Self { config, access }
    }
}

pub struct Engine {
    snapshot:    RwLock<Arc<Snapshot>>,
    readers:     Mutex<HashMap<String, Arc<Mutex<ReaderState>>>>,
    cooldown:    Cooldown,
    dedupe:      DedupeCache,
    metrics:     Arc<MetricsStore>,
    alerts:      Arc<AlertsStore>,
    store:       Option<Arc<dyn Store>>,
    events_seen: AtomicU64,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        metrics: Arc<MetricsStore>,
        alerts: Arc<AlertsStore>,
        store: Option<Arc<dyn Store>>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::build(config))),
            readers: Mutex::new(HashMap::new()),
            cooldown: Cooldown::new(),
            dedupe: DedupeCache::new(),
            metrics,
            alerts,
            store,
            events_seen: AtomicU64::new(0),
        }
    }

    /// Publish a new config and a freshly built access index. In-flight
    /// per-reader window state is retained; windows added by the new config
    /// materialize lazily on the next event per reader.
    pub fn update_config(&self, config: Arc<Config>) {
        *self.snapshot.write() = Arc::new(Snapshot::build(config));
    }

    /// Drop all reader state, the dedupe cache and the cooldown table.
    /// The sinks are cleared by their own administrative surface.
    pub fn reset(&self) {
        self.readers.lock().clear();
        self.dedupe.clear();
        self.cooldown.clear();
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }

    /// Run one event through the pipeline and return the alerts it
    /// produced, in emission order. Never fails: malformed inputs are
    /// repaired (default reader, clamped timestamp) per contract.
    pub async fn process(&self, event: NormalizedEvent) -> Vec<Alert> {
        let snap = self.snapshot.read().clone();
        let det = &snap.config.detection;
        self.events_seen.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let mut ev = event;
        ev.timestamp = Some(clamp_timestamp(
            ev.timestamp,
            now,
            duration_from_secs(det.max_clock_skew),
            duration_from_secs(det.max_future_skew),
        ));

        let dedupe_ttl = duration_from_secs(det.dedupe_window);
        if dedupe_ttl > Duration::zero()
            && self.dedupe.seen(&dedupe::hash_event(&ev), now, dedupe_ttl)
        {
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(alert) = self.evaluate_access(&snap, &ev) {
            out.push(alert);
        }

        let reader = self.get_reader(&ev.reader_id, &snap.config);
        let mut metrics_list = Vec::new();
        {
            let mut reader = reader.lock();
            if let Some(alert) = self.evaluate_auth_streak(det, &mut reader, &ev) {
                out.push(alert);
            }
            let ts = ev.timestamp.unwrap_or(now);
            for window in reader.windows_mut() {
                window.evict(ts - window.duration());
                window.add(EventEntry {
                    timestamp: ts,
                    uid:       ev.uid.clone(),
                    result:    ev.result,
                });
                let wm = window.metrics();
                if let Some(alert) = self.evaluate_window(det, &ev.reader_id, &wm) {
                    out.push(alert);
                }
                metrics_list.push(wm);
            }
        }

        for alert in &out {
            warn!(
                reader_id = %alert.reader_id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                window_sec = alert.window_sec,
                rules = ?alert.rules,
                score = alert.score,
                "alert triggered"
            );
            self.alerts.add(alert.clone());
            if let Some(store) = &self.store {
                if let Err(e) = store.save_alert(alert).await {
                    warn!("alert save failed: {e:#}");
                }
            }
        }
        if !metrics_list.is_empty() {
            self.metrics.update(&ev.reader_id, metrics_list.clone());
            if let Some(store) = &self.store {
                if let Err(e) = store.save_metrics(&ev.reader_id, &metrics_list).await {
                    warn!("metrics save failed: {e:#}");
                }
            }
        }
        out
    }

    /// Reader-map lookup under the structural mutex only; the per-reader
    /// lock is taken by the caller for the rest of the event.
    fn get_reader(&self, reader_id: &str, cfg: &Config) -> Arc<Mutex<ReaderState>> {
        let id = if reader_id.is_empty() { "unknown" } else { reader_id };
        let reader = {
            let mut readers = self.readers.lock();
            readers
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ReaderState::new(id))))
                .clone()
        };
        reader.lock().ensure_windows(&cfg.detection.windows);
        reader
    }
}

fn clamp_timestamp(
    ts: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    max_past: Duration,
    max_future: Duration,
) -> DateTime<Utc> {
    let ts = match ts {
        Some(t) => t,
        None => return now,
    };
    if max_past > Duration::zero() && now - ts > max_past {
        return now;
    }
    if max_future > Duration::zero() && ts - now > max_future {
        return now;
    }
    ts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_passes_in_bound_timestamps() {
        let now = Utc::now();
        let ts = now - Duration::seconds(1);
        let clamped = clamp_timestamp(Some(ts), now, Duration::seconds(2), Duration::seconds(2));
        assert_eq!(clamped, ts);
    }

    #[test]
    fn clamp_replaces_stale_and_future_timestamps() {
        let now = Utc::now();
        let stale = now - Duration::seconds(10);
        let future = now + Duration::seconds(10);
        let bound = Duration::seconds(2);
        assert_eq!(clamp_timestamp(Some(stale), now, bound, bound), now);
        assert_eq!(clamp_timestamp(Some(future), now, bound, bound), now);
        assert_eq!(clamp_timestamp(None, now, bound, bound), now);
    }

    #[test]
    fn clamp_disabled_with_zero_bounds() {
        let now = Utc::now();
        let stale = now - Duration::days(30);
        assert_eq!(
            clamp_timestamp(Some(stale), now, Duration::zero(), Duration::zero()),
            stale
        );
    }
}
