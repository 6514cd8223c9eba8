// src/config.rs
//
// Configuration tree, JSON load/save, validation, and the hot-reload
// manager. Every section defaults independently so a partial file only
// overrides what it names. Durations are plain seconds (f64) in the file;
// `duration_from_secs` converts at the point of use.
//
// The Manager polls the file's mtime and republishes a fresh snapshot; the
// engine swaps snapshots atomically, so a bad reload never tears running
// detection state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Convert a seconds value from the config file into a chrono duration.
pub fn duration_from_secs(secs: f64) -> Duration {
    Duration::nanoseconds((secs * 1e9).round() as i64)
}

// ── Config tree ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level:      String,
    pub ingest:         IngestConfig,
    pub detection:      DetectionConfig,
    pub access_control: AccessControlConfig,
    pub storage:        StorageConfig,
    pub metrics:        MetricsConfig,
    pub alerts:         AlertsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level:      "info".to_string(),
            ingest:         IngestConfig::default(),
            detection:      DetectionConfig::default(),
            access_control: AccessControlConfig::default(),
            storage:        StorageConfig::default(),
            metrics:        MetricsConfig::default(),
            alerts:         AlertsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Capacity of the bounded engine queue. A full queue drops events.
    pub channel_buffer:    usize,
    pub default_reader_id: String,
    pub file_tail:         FileTailConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_buffer:    10_000,
            default_reader_id: "unknown".to_string(),
            file_tail:         FileTailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTailConfig {
    pub enabled:      bool,
    pub start_at_end: bool,
    pub files:        Vec<PathBuf>,
}

impl Default for FileTailConfig {
    fn default() -> Self {
        Self { enabled: false, start_at_end: true, files: Vec::new() }
    }
}

/// Detection thresholds and window list. All durations are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub windows:                   Vec<f64>,
    pub aps_threshold:             f64,
    pub failure_ratio_threshold:   f64,
    pub uid_diversity_threshold:   f64,
    pub timing_variance_threshold: f64,
    pub attack_score_threshold:    f64,
    pub weights:                   WeightsConfig,
    pub epsilon:                   f64,
    pub min_attempts:              u64,
    pub aps_elevated_threshold:    f64,
    pub alert_cooldown:            f64,
    pub dedupe_window:             f64,
    pub max_clock_skew:            f64,
    pub max_future_skew:           f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            windows:                   vec![1.0, 10.0, 60.0],
            aps_threshold:             20.0,
            failure_ratio_threshold:   0.7,
            uid_diversity_threshold:   0.6,
            timing_variance_threshold: 0.02,
            attack_score_threshold:    100.0,
            weights:                   WeightsConfig::default(),
            epsilon:                   0.0001,
            min_attempts:              10,
            aps_elevated_threshold:    10.0,
            alert_cooldown:            5.0,
            dedupe_window:             1.0,
            max_clock_skew:            2.0,
            max_future_skew:           2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub aps: f64,
    pub fr:  f64,
    pub uds: f64,
    pub tv:  f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self { aps: 1.0, fr: 50.0, uds: 40.0, tv: 1.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessControlConfig {
    pub enabled:           bool,
    pub whitelist_only:    bool,
    pub whitelist:         Vec<String>,
    pub blacklist:         Vec<String>,
    pub reader_whitelists: HashMap<String, Vec<String>>,
    pub reader_blacklists: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    /// Directory the JSONL store appends alerts.jsonl / metrics.jsonl under.
    pub dir:     PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { enabled: false, dir: PathBuf::from("rfguard_output") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub store_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { store_limit: 5_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub store_limit: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { store_limit: 1_000 }
    }
}

// ── Load / save / validate ────────────────────────────────────────────────────

pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    if content.trim().is_empty() {
        bail!("config file {} is empty", path.display());
    }
    let mut cfg: Config = serde_json::from_str(&content)
        .with_context(|| format!("parse config {}", path.display()))?;
    apply_defaults(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn save(path: &Path, cfg: &Config) -> Result<()> {
    let data = serde_json::to_string_pretty(cfg)?;
    std::fs::write(path, data)
        .with_context(|| format!("write config {}", path.display()))
}

/// Backstop for fields that deserialize to unusable values (explicit zeros,
/// empty lists). Mirrors what the defaults give an absent field.
fn apply_defaults(cfg: &mut Config) {
    if cfg.detection.windows.is_empty() {
        cfg.detection.windows = DetectionConfig::default().windows;
    }
    if cfg.detection.epsilon <= 0.0 {
        cfg.detection.epsilon = 0.0001;
    }
    if cfg.metrics.store_limit == 0 {
        cfg.metrics.store_limit = 5_000;
    }
    if cfg.alerts.store_limit == 0 {
        cfg.alerts.store_limit = 1_000;
    }
    if cfg.ingest.channel_buffer == 0 {
        cfg.ingest.channel_buffer = 10_000;
    }
    if cfg.ingest.default_reader_id.is_empty() {
        cfg.ingest.default_reader_id = "unknown".to_string();
    }
}

pub fn validate(cfg: &Config) -> Result<()> {
    if cfg.detection.aps_threshold <= 0.0 {
        bail!("detection.aps_threshold must be > 0");
    }
    if cfg.detection.attack_score_threshold <= 0.0 {
        bail!("detection.attack_score_threshold must be > 0");
    }
    for &win in &cfg.detection.windows {
        if win <= 0.0 {
            bail!("detection.windows contains non-positive duration: {win}");
        }
    }
    if cfg.storage.enabled && cfg.storage.dir.as_os_str().is_empty() {
        bail!("storage.dir required when storage.enabled is true");
    }
    Ok(())
}

/// Anchor a relative config path to the current working directory so the
/// watcher keeps resolving it after any later chdir.
pub fn resolve_path(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() || path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

// ── Hot-reload manager ────────────────────────────────────────────────────────

/// Owns the config file path and the current snapshot. `watch` polls the
/// file's mtime and republishes on change; a file that fails to load keeps
/// the previous snapshot in place.
pub struct Manager {
    path:     PathBuf,
    current:  RwLock<Arc<Config>>,
    mod_time: Mutex<Option<SystemTime>>,
}

impl Manager {
    pub fn new(path: PathBuf) -> Result<Self> {
        let cfg = load(&path)?;
        let mod_time = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(cfg)),
            mod_time: Mutex::new(mod_time),
        })
    }

    /// Manager over a fixed in-memory config, for runs without a config
    /// file. `watch` must not be spawned for such a manager.
    pub fn with_defaults(cfg: Config) -> Self {
        Self {
            path:     PathBuf::new(),
            current:  RwLock::new(Arc::new(cfg)),
            mod_time: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reload(&self) -> Result<Arc<Config>> {
        let cfg = Arc::new(load(&self.path)?);
        *self.current.write() = cfg.clone();
        if let Ok(modified) = std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            *self.mod_time.lock() = Some(modified);
        }
        Ok(cfg)
    }

    pub fn needs_reload(&self) -> Result<bool> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("stat config {}", self.path.display()))?;
        let last = *self.mod_time.lock();
        Ok(match last {
            Some(last) => modified > last,
            None => true,
        })
    }

    /// Poll the config file and hand fresh snapshots to `on_reload`.
    /// Runs until the task is dropped.
    pub async fn watch<F>(self: Arc<Self>, interval: std::time::Duration, on_reload: F)
    where
        F: Fn(Arc<Config>),
    {
        let interval = if interval.is_zero() {
            std::time::Duration::from_secs(3)
        } else {
            interval
        };
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // first tick fires immediately
        loop {
            tick.tick().await;
            match self.needs_reload() {
                Ok(true) => match self.reload() {
                    Ok(cfg) => {
                        info!(path = %self.path.display(), "config reloaded");
                        on_reload(cfg);
                    }
                    Err(e) => warn!(path = %self.path.display(), "config reload failed: {e:#}"),
                },
                Ok(false) => {}
                Err(e) => warn!("config stat failed: {e:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        validate(&cfg).unwrap();
        assert_eq!(cfg.detection.windows, vec![1.0, 10.0, 60.0]);
        assert_eq!(cfg.metrics.store_limit, 5_000);
        assert_eq!(cfg.alerts.store_limit, 1_000);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfguard.json");
        std::fs::write(&path, r#"{"detection": {"aps_threshold": 42.5}}"#).unwrap();
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.detection.aps_threshold, 42.5);
        // untouched sections fall back to defaults
        assert_eq!(cfg.detection.min_attempts, 10);
        assert_eq!(cfg.ingest.channel_buffer, 10_000);
    }

    #[test]
    fn rejects_bad_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfguard.json");
        std::fs::write(&path, r#"{"detection": {"aps_threshold": -1}}"#).unwrap();
        assert!(load(&path).is_err());

        std::fs::write(&path, r#"{"detection": {"windows": [1.0, 0.0]}}"#).unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfguard.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn manager_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfguard.json");
        save(&path, &Config::default()).unwrap();
        let mgr = Manager::new(path.clone()).unwrap();
        assert_eq!(mgr.get().detection.min_attempts, 10);

        let mut cfg = Config::default();
        cfg.detection.min_attempts = 3;
        save(&path, &cfg).unwrap();
        let reloaded = mgr.reload().unwrap();
        assert_eq!(reloaded.detection.min_attempts, 3);
    }

    #[test]
    fn duration_conversion() {
        assert_eq!(duration_from_secs(1.0), Duration::seconds(1));
        assert_eq!(duration_from_secs(0.5), Duration::milliseconds(500));
        assert_eq!(duration_from_secs(0.0), Duration::zero());
    }
}
