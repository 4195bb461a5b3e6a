//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use lt_core::UsageEventKind;

/// Listening session tracker.
///
/// Detects audio-accessory listening sessions from connection, playback and
/// volume signals, and reconstructs sessions missed while it was not running.
#[derive(Debug, Parser)]
#[command(name = "lt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the session monitor, reading signal lines from stdin.
    Run {
        /// Skip the startup reconciliation pass.
        #[arg(long)]
        no_backfill: bool,
    },

    /// Reconstruct sessions missed while the monitor was down.
    Backfill {
        /// Print recovered sessions without storing them.
        #[arg(long)]
        dry_run: bool,

        /// Evaluate as of this instant instead of the current time (RFC 3339).
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Manage the usage-event log.
    #[command(subcommand)]
    Usage(UsageAction),

    /// List stored sessions.
    Sessions {
        /// Output as JSON lines.
        #[arg(long)]
        json: bool,

        /// Show at most this many sessions.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show reconciliation state and stored totals.
    Status,
}

/// Usage-event log actions.
#[derive(Debug, Subcommand)]
pub enum UsageAction {
    /// Record a single foreground transition.
    Add {
        /// Application package name (e.g., com.spotify.music).
        #[arg(long)]
        package: String,

        /// Transition kind.
        #[arg(long, value_enum)]
        kind: KindArg,

        /// When the transition happened (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Import usage events as JSON lines from stdin.
    Import,
}

/// Foreground transition kinds accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Enter,
    Exit,
}

impl From<KindArg> for UsageEventKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Enter => Self::ForegroundEnter,
            KindArg::Exit => Self::ForegroundExit,
        }
    }
}
