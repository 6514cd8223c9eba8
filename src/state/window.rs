// src/state/window.rs
//
// One rolling window over a single reader's event stream.
//
// Layout: a flat buffer with a logical head. Eviction advances the head and
// decrements the running counters; once the dead prefix reaches half the
// buffer the live tail is compacted down, which caps memory at twice the
// true window occupancy. Counters are maintained incrementally so
// add-then-metrics never rescans evicted entries.
//
// Timing variance is Welford's single-pass algorithm over inter-arrival
// gaps. Negative gaps (out-of-order arrivals inside the window) clamp to
// zero rather than reject — edge clocks are loose and a skewed variance
// beats a dropped event.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::duration_from_secs;
use crate::events::{AuthResult, WindowMetrics};

#[derive(Debug, Clone)]
pub struct EventEntry {
    pub timestamp: DateTime<Utc>,
    pub uid:       String,
    pub result:    AuthResult,
}

#[derive(Debug)]
pub struct WindowState {
    duration_secs: f64,
    duration:      Duration,
    events:        Vec<EventEntry>,
    head:          usize,
    attempts:      u64,
    failures:      u64,
    uid_counts:    HashMap<String, u64>,
}

impl WindowState {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            duration: duration_from_secs(duration_secs),
            events: Vec::with_capacity(128),
            head: 0,
            attempts: 0,
            failures: 0,
            uid_counts: HashMap::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn window_sec(&self) -> i64 {
        self.duration_secs.round() as i64
    }

    pub fn add(&mut self, entry: EventEntry) {
        self.attempts += 1;
        if entry.result == AuthResult::Failure {
            self.failures += 1;
        }
        if !entry.uid.is_empty() {
            *self.uid_counts.entry(entry.uid.clone()).or_insert(0) += 1;
        }
        self.events.push(entry);
    }

    /// Drop all head entries older than `cutoff`, then compact when the
    /// dead prefix reaches half the physical buffer.
    pub fn evict(&mut self, cutoff: DateTime<Utc>) {
        while self.head < self.events.len() {
            let entry = &self.events[self.head];
            if entry.timestamp >= cutoff {
                break;
            }
            self.attempts -= 1;
            if entry.result == AuthResult::Failure {
                self.failures -= 1;
            }
            if !entry.uid.is_empty() {
                let remove = match self.uid_counts.get_mut(&entry.uid) {
                    Some(count) if *count <= 1 => true,
                    Some(count) => {
                        *count -= 1;
                        false
                    }
                    None => false,
                };
                if remove {
                    self.uid_counts.remove(&entry.uid);
                }
            }
            self.head += 1;
        }
        if self.head > 0 && self.head * 2 >= self.events.len() {
            self.events.drain(..self.head);
            self.head = 0;
        }
    }

    pub fn metrics(&self) -> WindowMetrics {
        let mut aps = 0.0;
        let mut fr = 0.0;
        let mut uds = 0.0;
        if self.attempts > 0 {
            aps = self.attempts as f64 / self.duration_secs;
            fr = self.failures as f64 / self.attempts as f64;
            uds = self.uid_counts.len() as f64 / self.attempts as f64;
        }
        WindowMetrics {
            window_sec: self.window_sec(),
            attempts:   self.attempts,
            failures:   self.failures,
            aps,
            fr,
            uds,
            tv: self.variance_delta(),
        }
    }

    /// Welford over inter-arrival gaps of the live entries. Division is by
    /// `n`, not `n-1`; fewer than two live entries yield 0.
    fn variance_delta(&self) -> f64 {
        let live = &self.events[self.head..];
        if live.len() <= 1 {
            return 0.0;
        }
        let mut n = 0u64;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        let mut prev = live[0].timestamp;
        for entry in &live[1..] {
            let delta = gap_seconds(prev, entry.timestamp).max(0.0);
            n += 1;
            let diff = delta - mean;
            mean += diff / n as f64;
            m2 += diff * (delta - mean);
            prev = entry.timestamp;
        }
        if n == 0 {
            0.0
        } else {
            m2 / n as f64
        }
    }

    #[cfg(test)]
    fn live_entries(&self) -> &[EventEntry] {
        &self.events[self.head..]
    }
}

fn gap_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    match (to - from).num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => (to - from).num_milliseconds() as f64 / 1e3,
    }
}
