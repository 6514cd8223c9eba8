// src/engine/access.rs
//
// Immutable allow/deny index derived from one configuration snapshot.
// UIDs are stored normalized (uppercase hex only); sets that normalize to
// empty are stored as absent. Configuration reloads rebuild the whole index
// and swap it in with the config — it is never mutated in place.

use std::collections::{HashMap, HashSet};

use crate::config::AccessControlConfig;

#[derive(Debug, Default)]
pub struct AccessControlIndex {
    enabled:           bool,
    whitelist_only:    bool,
    global_whitelist:  Option<HashSet<String>>,
    global_blacklist:  Option<HashSet<String>>,
    reader_whitelists: Option<HashMap<String, HashSet<String>>>,
    reader_blacklists: Option<HashMap<String, HashSet<String>>>,
}

impl AccessControlIndex {
    pub fn build(cfg: &AccessControlConfig) -> Self {
        let mut index = Self {
            enabled:        cfg.enabled,
            whitelist_only: cfg.whitelist_only,
            ..Self::default()
        };
        if !index.enabled {
            return index;
        }
        index.global_whitelist = build_uid_set(&cfg.whitelist);
        index.global_blacklist = build_uid_set(&cfg.blacklist);
        index.reader_whitelists = build_uid_map(&cfg.reader_whitelists);
        index.reader_blacklists = build_uid_map(&cfg.reader_blacklists);
        index
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn whitelist_only(&self) -> bool {
        self.whitelist_only
    }

    /// `uid` must already be normalized.
    pub fn is_blacklisted(&self, reader_id: &str, uid: &str) -> bool {
        if uid.is_empty() {
            return false;
        }
        if let Some(global) = &self.global_blacklist {
            if global.contains(uid) {
                return true;
            }
        }
        if let Some(per_reader) = &self.reader_blacklists {
            if let Some(set) = per_reader.get(reader_id) {
                if set.contains(uid) {
                    return true;
                }
            }
        }
        false
    }

    pub fn is_whitelisted(&self, reader_id: &str, uid: &str) -> bool {
        if uid.is_empty() {
            return false;
        }
        if let Some(global) = &self.global_whitelist {
            if global.contains(uid) {
                return true;
            }
        }
        if let Some(per_reader) = &self.reader_whitelists {
            if let Some(set) = per_reader.get(reader_id) {
                if set.contains(uid) {
                    return true;
                }
            }
        }
        false
    }
}

/// Canonical UID form: hex digits only, lowercase folded to uppercase,
/// everything else discarded.
pub fn normalize_uid(uid: &str) -> String {
    uid.trim()
        .chars()
        .filter_map(|c| match c {
            '0'..='9' | 'A'..='F' => Some(c),
            'a'..='f' => Some(c.to_ascii_uppercase()),
            _ => None,
        })
        .collect()
}

fn build_uid_set(values: &[String]) -> Option<HashSet<String>> {
    let set: HashSet<String> = values
        .iter()
        .map(|v| normalize_uid(v))
        .filter(|uid| !uid.is_empty())
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

fn build_uid_map(values: &HashMap<String, Vec<String>>) -> Option<HashMap<String, HashSet<String>>> {
    let map: HashMap<String, HashSet<String>> = values
        .iter()
        .filter_map(|(reader, list)| build_uid_set(list).map(|set| (reader.clone(), set)))
        .collect();
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}
