// src/engine/dedupe.rs
//
// Short-TTL replay suppression. The key is a SHA-256 hex digest of the
// event's identity fields, so it is stable across restarts and cheap to
// compare. The cache records the instant of *first* observation and does
// not refresh on a hit — a contract, not an accident: refreshing would let
// a sustained replay pin an entry forever.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::events::NormalizedEvent;

const COMPACT_THRESHOLD: usize = 10_000;

#[derive(Default)]
pub struct DedupeCache {
    items: DashMap<String, DateTime<Utc>>,
}

impl DedupeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `key` was first seen within `ttl` of `now`. A miss (or an
    /// expired hit) records `now` under the key. A hit does not refresh.
    pub fn seen(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
        if ttl <= Duration::zero() {
            return false;
        }
        match self.items.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now - *occupied.get() <= ttl {
                    return true;
                }
                occupied.insert(now);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
            }
        }
        if self.items.len() > COMPACT_THRESHOLD {
            self.compact(now, ttl);
        }
        false
    }

    fn compact(&self, now: DateTime<Utc>, ttl: Duration) {
        self.items.retain(|_, ts| now - *ts <= ttl);
    }

    pub fn clear(&self) {
        self.items.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Digest of the fields that make two events byte-identical replays of each
/// other. Uses the post-clamp timestamp at nanosecond precision.
pub fn hash_event(ev: &NormalizedEvent) -> String {
    let ts = ev
        .timestamp
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .unwrap_or_default();
    let joined = [
        ev.reader_id.as_str(),
        ev.uid.as_str(),
        ev.result.as_str(),
        ev.error_code.as_str(),
        ts.as_str(),
    ]
    .join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AuthResult;

    #[test]
    fn duplicate_within_ttl_is_seen() {
        let cache = DedupeCache::new();
        let now = Utc::now();
        let ttl = Duration::seconds(5);
        assert!(!cache.seen("k", now, ttl));
        assert!(cache.seen("k", now + Duration::seconds(3), ttl));
    }

    #[test]
    fn expired_entry_is_reinserted() {
        let cache = DedupeCache::new();
        let now = Utc::now();
        let ttl = Duration::seconds(5);
        assert!(!cache.seen("k", now, ttl));
        assert!(!cache.seen("k", now + Duration::seconds(6), ttl));
        // reinsert refreshed the stored instant
        assert!(cache.seen("k", now + Duration::seconds(8), ttl));
    }

    #[test]
    fn hit_does_not_refresh_first_observation() {
        let cache = DedupeCache::new();
        let now = Utc::now();
        let ttl = Duration::seconds(5);
        assert!(!cache.seen("k", now, ttl));
        assert!(cache.seen("k", now + Duration::seconds(4), ttl));
        // 9s after first observation: past the TTL even though the last
        // duplicate was 5s ago — passes through by contract
        assert!(!cache.seen("k", now + Duration::seconds(9), ttl));
    }

    #[test]
    fn zero_ttl_never_deduplicates() {
        let cache = DedupeCache::new();
        let now = Utc::now();
        assert!(!cache.seen("k", now, Duration::zero()));
        assert!(!cache.seen("k", now, Duration::zero()));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn compaction_drops_expired_entries() {
        let cache = DedupeCache::new();
        let base = Utc::now();
        let ttl = Duration::seconds(1);
        for i in 0..COMPACT_THRESHOLD {
            cache.seen(&format!("old-{i}"), base, ttl);
        }
        // next insert exceeds the threshold 10s later, sweeping the old set
        cache.seen("fresh", base + Duration::seconds(10), ttl);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hash_distinguishes_fields() {
        let ev = NormalizedEvent {
            timestamp:  Some(Utc::now()),
            reader_id:  "reader01".into(),
            uid:        "AABBCC".into(),
            result:     AuthResult::Failure,
            error_code: "AUTH_FAIL".into(),
            source:     "test".into(),
            raw:        String::new(),
        };
        let mut other = ev.clone();
        other.uid = "AABBCD".into();
        assert_eq!(hash_event(&ev), hash_event(&ev));
        assert_ne!(hash_event(&ev), hash_event(&other));
        assert_eq!(hash_event(&ev).len(), 64);
    }
}
