// src/lib.rs
//
// RFGuard — streaming anomaly detection for RFID / access-control reader
// events. Heterogeneous reader logs are normalized into a common schema and
// run through a per-reader statistical detector: rolling-window rate,
// failure-ratio, UID-diversity and timing-variance rules, a weighted
// composite attack score, allow/deny UID policy, replay dedupe and alert
// cooldowns.

pub mod config;
pub mod engine;
pub mod events;
pub mod ingest;
pub mod normalize;
pub mod parser;
pub mod sink;
pub mod state;
pub mod storage;
