// src/storage.rs
//
// Best-effort persistence collaborator. The engine treats storage as
// fire-and-forget: errors bubble up to be logged at warn and the event
// pipeline continues. The JSONL store appends one object per line under an
// output directory — wire the files to a database loader or message bus in
// production.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::events::{Alert, WindowMetrics};

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_alert(&self, alert: &Alert) -> Result<()>;
    async fn save_metrics(&self, reader_id: &str, metrics: &[WindowMetrics]) -> Result<()>;
}

pub struct JsonlStore {
    dir: PathBuf,
}

#[derive(Serialize)]
struct MetricsRecord<'a> {
    saved_at:  chrono::DateTime<Utc>,
    reader_id: &'a str,
    metrics:   &'a [WindowMetrics],
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir: PathBuf = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    async fn append(&self, file: &str, line: String) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonlStore {
    async fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.append("alerts.jsonl", serde_json::to_string(alert)?).await
    }

    async fn save_metrics(&self, reader_id: &str, metrics: &[WindowMetrics]) -> Result<()> {
        let record = MetricsRecord {
            saved_at: Utc::now(),
            reader_id,
            metrics,
        };
        self.append("metrics.jsonl", serde_json::to_string(&record)?).await
    }
}
