// src/state/reader.rs
//
// Per-reader detection state: one WindowState per configured duration plus
// the per-UID consecutive-failure streaks. The engine serializes all access
// to a reader, so there is no lock at this level.

use std::collections::{BTreeMap, HashMap};

use crate::state::window::WindowState;

pub struct ReaderState {
    id:                 String,
    windows:            BTreeMap<i64, WindowState>,
    uid_failure_streak: HashMap<String, u32>,
}

impl ReaderState {
    pub fn new(id: &str) -> Self {
        Self {
            id:                 id.to_string(),
            windows:            BTreeMap::new(),
            uid_failure_streak: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Materialize any configured windows this reader does not have yet.
    /// Windows are never shrunk; a reload that drops a duration leaves the
    /// existing state in place.
    pub fn ensure_windows(&mut self, window_secs: &[f64]) {
        for &secs in window_secs {
            self.windows
                .entry(secs.round() as i64)
                .or_insert_with(|| WindowState::new(secs));
        }
    }

    /// Windows in ascending `window_sec` order. The BTreeMap key fixes the
    /// order in which one event can produce multiple alerts: shortest first.
    pub fn windows_mut(&mut self) -> impl Iterator<Item = &mut WindowState> {
        self.windows.values_mut()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Consecutive failures for this UID, bumped by one.
    pub fn bump_streak(&mut self, uid: &str) -> u32 {
        let count = self.uid_failure_streak.entry(uid.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Any non-failure (or empty-error-code) event for a UID zeroes only
    /// that UID's streak; other UIDs on the reader are untouched.
    pub fn reset_streak(&mut self, uid: &str) {
        self.uid_failure_streak.insert(uid.to_string(), 0);
    }

    #[cfg(test)]
    pub fn streak(&self, uid: &str) -> u32 {
        self.uid_failure_streak.get(uid).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_materialize_lazily_and_never_shrink() {
        let mut reader = ReaderState::new("reader01");
        reader.ensure_windows(&[10.0, 1.0]);
        assert_eq!(reader.window_count(), 2);

        // new config adds one window, drops another; existing state stays
        reader.ensure_windows(&[60.0]);
        assert_eq!(reader.window_count(), 3);

        let secs: Vec<i64> = reader.windows_mut().map(|w| w.window_sec()).collect();
        assert_eq!(secs, vec![1, 10, 60]);
    }

    #[test]
    fn streaks_are_per_uid() {
        let mut reader = ReaderState::new("reader01");
        assert_eq!(reader.bump_streak("AA"), 1);
        assert_eq!(reader.bump_streak("AA"), 2);
        assert_eq!(reader.bump_streak("BB"), 1);
        reader.reset_streak("AA");
        assert_eq!(reader.streak("AA"), 0);
        assert_eq!(reader.streak("BB"), 1);
    }
}
