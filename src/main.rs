// src/main.rs
//
// RFGuard — streaming anomaly detection for RFID / access-control readers.
//
// Two operational modes:
//   tail    — follow a live reader log (JSON / CSV / key=value lines)
//   replay  — replay a captured log at scaled speed (testing/research)
//
// Usage:
//   rfguard --mode tail --path /var/log/access/readers.log
//   rfguard --mode replay --path captured.log --speed 10.0
//   rfguard --config rfguard.json            # hot-reloaded on change

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rfguard::config::{self, Config, Manager};
use rfguard::engine::Engine;
use rfguard::events::NormalizedEvent;
use rfguard::ingest::{self, EventPublisher};
use rfguard::sink::alerts::AlertsStore;
use rfguard::sink::metrics::MetricsStore;
use rfguard::storage::{JsonlStore, Store};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "rfguard",
    about   = "Streaming anomaly detection for RFID / access-control readers",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, help = "JSON config file, hot-reloaded on change")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/var/log/rfguard/events.log",
          help = "Reader log path (tail/replay modes)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, help = "Write alerts.jsonl / metrics.jsonl under this directory")]
    output: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,   // follow a live reader log
    Replay, // replay a static log at scaled speed
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = Arc::new(match &cli.config {
        Some(path) => Manager::new(config::resolve_path(path))?,
        None => Manager::with_defaults(Config::default()),
    });
    let cfg = manager.get();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("rfguard={}", cfg.log_level))),
        )
        .compact()
        .init();

    let metrics = Arc::new(MetricsStore::new(cfg.metrics.store_limit));
    let alerts = Arc::new(AlertsStore::new(cfg.alerts.store_limit));
    let store: Option<Arc<dyn Store>> = match (&cli.output, cfg.storage.enabled) {
        (Some(dir), _) => Some(Arc::new(JsonlStore::new(dir.clone())?)),
        (None, true)   => Some(Arc::new(JsonlStore::new(cfg.storage.dir.clone())?)),
        (None, false)  => None,
    };
    let engine = Arc::new(Engine::new(
        cfg.clone(),
        metrics.clone(),
        alerts.clone(),
        store,
    ));

    let (tx, mut rx) = mpsc::channel::<NormalizedEvent>(cfg.ingest.channel_buffer);
    let publisher = Arc::new(EventPublisher::new(tx));

    // Config watcher — republishes fresh snapshots into the engine.
    if cli.config.is_some() {
        let eng = engine.clone();
        tokio::spawn(
            manager
                .clone()
                .watch(Duration::from_secs(3), move |cfg| eng.update_config(cfg)),
        );
    }

    // Stats printer.
    tokio::spawn(stats_loop(
        engine.clone(),
        alerts.clone(),
        publisher.clone(),
    ));

    // Primary event source from the CLI.
    match cli.mode {
        Mode::Tail => {
            tokio::spawn(ingest::tail_file(
                cli.path.clone(),
                true,
                manager.clone(),
                publisher.clone(),
            ));
        }
        Mode::Replay => {
            let path = cli.path.clone();
            let speed = cli.speed;
            let mgr = manager.clone();
            let pb = publisher.clone();
            tokio::spawn(async move {
                if let Err(e) = ingest::replay_file(path, speed, mgr, pb).await {
                    tracing::error!("replay failed: {e:#}");
                }
            });
        }
    }

    // Additional configured tails.
    if cfg.ingest.file_tail.enabled {
        for path in &cfg.ingest.file_tail.files {
            tokio::spawn(ingest::tail_file(
                path.clone(),
                cfg.ingest.file_tail.start_at_end,
                manager.clone(),
                publisher.clone(),
            ));
        }
    }

    info!("rfguard started");

    // Single consumer: the engine serializes all detection work here.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => {
                    engine.process(event).await;
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

async fn stats_loop(engine: Arc<Engine>, alerts: Arc<AlertsStore>, publisher: Arc<EventPublisher>) {
    let start = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let events = engine.events_seen();
        info!(
            "stats uptime={:.0}s events={} eps={:.1} dropped={} readers={} alerts={}",
            elapsed,
            events,
            events as f64 / elapsed,
            publisher.dropped(),
            engine.reader_count(),
            alerts.len(),
        );
    }
}
