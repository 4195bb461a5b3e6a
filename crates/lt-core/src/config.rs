//! Tunable thresholds for the engine and the backfill pass.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::types::Percentage;
use crate::usage::{DEFAULT_MEDIA_PACKAGES, MediaAllowlist};

/// Configuration for live session tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval of the backstop re-evaluation tick.
    /// Default: 3000 (3 seconds).
    pub tick_interval_ms: u64,

    /// Interval between volume samples while a session is open.
    /// Default: 5000 (5 seconds).
    pub sample_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3_000,   // 3 seconds
            sample_interval_ms: 5_000, // 5 seconds
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn sample_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.sample_interval_ms.max(1))
    }
}

/// Configuration for reconstructing sessions missed during an outage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Outages shorter than this are not worth reconciling.
    /// Default: 300000 (5 minutes).
    pub min_gap_ms: i64,

    /// Foreground intervals shorter than this are discarded as noise.
    /// Default: 30000 (30 seconds).
    pub min_session_ms: i64,

    /// Upper bound on how far back the usage log is scanned.
    /// Default: 604800000 (7 days).
    pub max_lookback_ms: i64,

    /// Volume assumed when no live session was ever measured.
    /// Default: 50.0.
    pub default_average_volume: f64,

    /// Packages whose foreground time counts as listening.
    pub media_packages: Vec<String>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            min_gap_ms: 300_000,         // 5 minutes
            min_session_ms: 30_000,      // 30 seconds
            max_lookback_ms: 604_800_000, // 7 days
            default_average_volume: 50.0,
            media_packages: DEFAULT_MEDIA_PACKAGES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl BackfillConfig {
    pub fn min_gap(&self) -> Duration {
        Duration::milliseconds(self.min_gap_ms)
    }

    pub fn min_session(&self) -> Duration {
        Duration::milliseconds(self.min_session_ms)
    }

    pub fn max_lookback(&self) -> Duration {
        Duration::milliseconds(self.max_lookback_ms)
    }

    pub const fn default_average_volume(&self) -> Percentage {
        Percentage::clamped(self.default_average_volume)
    }

    pub fn allowlist(&self) -> MediaAllowlist {
        MediaAllowlist::new(&self.media_packages)
    }
}
