//! Run command: the long-lived session monitor.
//!
//! Signals arrive as JSON lines on stdin, one per platform callback:
//!
//! ```text
//! {"signal":"connection","connected":true}
//! {"signal":"playback","active":true}
//! {"signal":"volume","level":7,"max":15}
//! ```
//!
//! Completed sessions are stored and printed to stdout as JSON payload lines.
//! The monitor stops on stdin EOF or Ctrl-C, closing any open session first.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use lt_core::{
    BoxError, Collaborators, Engine, Reconciler, SystemClock, Transition, VolumeReading,
    VolumeSource,
};
use lt_db::SharedDatabase;

use crate::Config;
use crate::sink::StoringSink;

/// One line of signal input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalLine {
    Connection { connected: bool },
    Playback { active: bool },
    Volume { level: i32, max: i32 },
}

/// Volume source fed by `volume` signal lines.
#[derive(Debug)]
pub struct PushedVolume(Mutex<VolumeReading>);

impl Default for PushedVolume {
    fn default() -> Self {
        Self(Mutex::new(VolumeReading::SILENT))
    }
}

impl PushedVolume {
    pub fn set(&self, reading: VolumeReading) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = reading;
    }
}

impl VolumeSource for PushedVolume {
    fn current_volume(&self) -> Result<VolumeReading, BoxError> {
        Ok(*self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub fn run(config: &Config, db: SharedDatabase, no_backfill: bool) -> Result<()> {
    let _lock = acquire_lock(&config.lock_path())?;

    let sink = Arc::new(StoringSink::new(db.clone(), io::stdout()));
    if no_backfill {
        tracing::debug!("startup backfill disabled");
    } else {
        let outcome = Reconciler::new(&config.backfill, &db, &db).run(Utc::now(), sink.as_ref());
        tracing::debug!(?outcome, "startup backfill finished");
    }

    let volume = Arc::new(PushedVolume::default());
    let engine = Engine::new(
        config.engine.clone(),
        Collaborators {
            volume: volume.clone(),
            sink,
            store: Arc::new(db),
            clock: Arc::new(SystemClock),
        },
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(monitor(&engine, &volume));
    // stdin reads run on a blocking thread that may never return
    runtime.shutdown_background();
    result
}

async fn monitor(engine: &Engine, volume: &PushedVolume) -> Result<()> {
    let ticks = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_ticks().await }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    apply_line(engine, volume, &line);
                }
                Ok(None) => {
                    tracing::info!("signal input closed");
                    break Ok(());
                }
                Err(err) => break Err(err).context("failed to read signal input"),
            },
            res = &mut ctrl_c => {
                if let Err(err) = res {
                    tracing::warn!(error = %err, "failed to listen for ctrl-c");
                }
                tracing::info!("interrupted");
                break Ok(());
            }
        }
    };

    engine.shutdown();
    if let Err(err) = ticks.await {
        tracing::warn!(error = %err, "tick loop ended abnormally");
    }
    result
}

/// Parses one input line and forwards it to the engine.
///
/// Blank and malformed lines are skipped.
pub fn apply_line(engine: &Engine, volume: &PushedVolume, line: &str) -> Transition {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Transition::None;
    }
    match serde_json::from_str::<SignalLine>(trimmed) {
        Ok(signal) => apply(engine, volume, signal),
        Err(err) => {
            tracing::warn!(error = %err, line = trimmed, "ignoring malformed signal line");
            Transition::None
        }
    }
}

fn apply(engine: &Engine, volume: &PushedVolume, signal: SignalLine) -> Transition {
    match signal {
        SignalLine::Connection { connected } => engine.update_connection(connected),
        SignalLine::Playback { active } => engine.update_playback(active),
        SignalLine::Volume { level, max } => {
            volume.set(VolumeReading::new(level, max));
            engine.volume_changed()
        }
    }
}

/// Takes the single-instance lock, creating the lock file if needed.
fn acquire_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create lock directory")?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| format!("another monitor holds {}", path.display()))?;
    Ok(file)
}
