// src/engine/cooldown.rs
//
// Per-key minimum-interval gate for alert suppression. Two key schemas are
// in use: "<reader>|<window_sec>" for window and access-control alerts
// (access-control uses a synthetic window_sec of 0) and
// "authfail|<reader>|<uid>" for the repeated-failure rule.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Default)]
pub struct Cooldown {
    last: DashMap<String, DateTime<Utc>>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window-alert key schema.
    pub fn allow_window(&self, reader_id: &str, window_sec: i64, cooldown: Duration) -> bool {
        if cooldown <= Duration::zero() {
            return true;
        }
        self.allow(&format!("{reader_id}|{window_sec}"), cooldown)
    }

    /// True when nothing was emitted under `key` within `cooldown`; records
    /// the emission instant on success. A non-positive cooldown always
    /// allows and records nothing.
    pub fn allow(&self, key: &str, cooldown: Duration) -> bool {
        if cooldown <= Duration::zero() {
            return true;
        }
        let now = Utc::now();
        match self.last.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now - *occupied.get() < cooldown {
                    return false;
                }
                occupied.insert(now);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    pub fn clear(&self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_within_cooldown() {
        let cd = Cooldown::new();
        let window = Duration::seconds(60);
        assert!(cd.allow("reader01|1", window));
        assert!(!cd.allow("reader01|1", window));
        // distinct key has its own slot
        assert!(cd.allow("reader01|10", window));
    }

    #[test]
    fn zero_cooldown_always_allows() {
        let cd = Cooldown::new();
        assert!(cd.allow("k", Duration::zero()));
        assert!(cd.allow("k", Duration::zero()));
        // nothing was recorded, so a real cooldown starts fresh
        assert!(cd.allow("k", Duration::seconds(60)));
    }

    #[test]
    fn clear_resets_all_slots() {
        let cd = Cooldown::new();
        let window = Duration::seconds(60);
        assert!(cd.allow_window("reader01", 1, window));
        cd.clear();
        assert!(cd.allow_window("reader01", 1, window));
    }
}
