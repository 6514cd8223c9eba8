// src/ingest.rs
//
// Event sources feeding the engine queue. Two modes:
//   tail   — follow a live log file, parsing whatever format it emits
//   replay — replay a recorded log at scaled speed, rewriting timestamps
//
// Publication is non-blocking by contract: a full queue drops the event
// and logs a warning. No back-pressure ever reaches the source.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Manager;
use crate::events::NormalizedEvent;
use crate::normalize::normalize;
use crate::parser::LineParser;

pub struct EventPublisher {
    tx:      mpsc::Sender<NormalizedEvent>,
    dropped: AtomicU64,
}

impl EventPublisher {
    pub fn new(tx: mpsc::Sender<NormalizedEvent>) -> Self {
        Self { tx, dropped: AtomicU64::new(0) }
    }

    /// Non-blocking send. Returns false when the event was dropped (queue
    /// full) or the engine is gone.
    pub fn try_publish(&self, ev: NormalizedEvent) -> bool {
        match self.tx.try_send(ev) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(reader_id = %ev.reader_id, "event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn publish_line(
    parser: &mut LineParser,
    line: &str,
    manager: &Manager,
    publisher: &EventPublisher,
    source: &str,
) {
    let Some(fields) = parser.parse_line(line) else {
        return;
    };
    match normalize(fields, &manager.get()) {
        Ok(mut ev) => {
            ev.source = source.to_string();
            publisher.try_publish(ev);
        }
        Err(e) => warn!("normalize error: {e:#}"),
    }
}

/// Follow a log file forever, surviving rotation/truncation by reopening.
pub async fn tail_file(
    path: PathBuf,
    start_at_end: bool,
    manager: Arc<Manager>,
    publisher: Arc<EventPublisher>,
) {
    let mut parser = LineParser::new();
    info!(path = %path.display(), start_at_end, "tailing");
    loop {
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), "tail open failed: {e}");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        if start_at_end {
            if let Ok(pos) = reader.seek(SeekFrom::End(0)).await {
                offset = pos;
            }
        }
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    // a shrinking file means rotation/truncation — reopen
                    if let Ok(meta) = tokio::fs::metadata(&path).await {
                        if meta.len() < offset {
                            break;
                        }
                    }
                }
                Ok(n) => {
                    offset += n as u64;
                    publish_line(&mut parser, &line, &manager, &publisher, "file_tail");
                }
                Err(e) => {
                    warn!(path = %path.display(), "tail read error: {e}");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    break;
                }
            }
        }
    }
}

/// Replay a recorded log preserving relative timing, scaled by `speed`.
/// Event timestamps are rewritten to the wall clock at publish time so the
/// engine sees a live stream.
pub async fn replay_file(
    path: PathBuf,
    speed: f64,
    manager: Arc<Manager>,
    publisher: Arc<EventPublisher>,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut parser = LineParser::new();
    let mut events: Vec<NormalizedEvent> = Vec::new();
    for line in content.lines() {
        let Some(fields) = parser.parse_line(line) else {
            continue;
        };
        match normalize(fields, &manager.get()) {
            Ok(mut ev) => {
                ev.source = "replay".to_string();
                events.push(ev);
            }
            Err(e) => warn!("replay parse error: {e:#}"),
        }
    }
    if events.is_empty() {
        warn!(path = %path.display(), "replay file produced no events");
        return Ok(());
    }
    events.sort_by_key(|ev| ev.timestamp);

    let speed = if speed <= 0.0 { 1.0 } else { speed };
    let base_ts = events[0].timestamp.unwrap_or_else(Utc::now);
    let base_wall = tokio::time::Instant::now();
    let total = events.len();

    info!(path = %path.display(), events = total, speed, "replay started");
    for mut ev in events {
        let ts = ev.timestamp.unwrap_or(base_ts);
        let offset_secs = ((ts - base_ts).num_milliseconds() as f64 / 1000.0 / speed).max(0.0);
        tokio::time::sleep_until(base_wall + Duration::from_secs_f64(offset_secs)).await;
        ev.timestamp = Some(Utc::now());
        publisher.try_publish(ev);
    }
    info!(events = total, "replay finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn publisher_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let publisher = EventPublisher::new(tx);
        let ev = NormalizedEvent {
            timestamp:  Some(Utc::now()),
            reader_id:  "reader01".into(),
            uid:        String::new(),
            result:     Default::default(),
            error_code: String::new(),
            source:     "test".into(),
            raw:        String::new(),
        };
        assert!(publisher.try_publish(ev.clone()));
        assert!(!publisher.try_publish(ev.clone()));
        assert_eq!(publisher.dropped(), 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn replay_publishes_in_timestamp_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(
            &path,
            concat!(
                "{\"timestamp\":\"2025-03-01T10:00:01Z\",\"reader\":\"late\",\"uid\":\"BB\",\"result\":\"ok\"}\n",
                "{\"timestamp\":\"2025-03-01T10:00:00Z\",\"reader\":\"early\",\"uid\":\"AA\",\"result\":\"ok\"}\n",
            ),
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let publisher = Arc::new(EventPublisher::new(tx));
        let manager = Arc::new(Manager::with_defaults(Config::default()));
        replay_file(path, 1000.0, manager, publisher).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.reader_id, "early");
        assert_eq!(second.reader_id, "late");
        assert_eq!(first.source, "replay");
    }
}
