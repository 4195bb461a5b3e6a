//! System usage events, the ground truth for backfill.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PackageId;

/// Packages treated as media-capable when no allowlist is configured.
pub const DEFAULT_MEDIA_PACKAGES: &[&str] = &[
    "com.spotify.music",
    "com.google.android.youtube",
    "com.google.android.youtube.music",
    "com.instagram.android",
    "com.zhiliaoapp.musically",
    "com.netflix.mediaclient",
    "com.amazon.mp3",
    "com.apple.android.music",
    "com.soundcloud.android",
    "com.gaana",
    "com.jio.media.jiobeats",
    "com.google.android.apps.youtube.music",
];

/// Kind of a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageEventKind {
    ForegroundEnter,
    ForegroundExit,
}

impl fmt::Display for UsageEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ForegroundEnter => "foreground_enter",
            Self::ForegroundExit => "foreground_exit",
        };
        write!(f, "{s}")
    }
}

impl FromStr for UsageEventKind {
    type Err = UnknownUsageEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "foreground_enter" | "move_to_foreground" | "enter" => Ok(Self::ForegroundEnter),
            "foreground_exit" | "move_to_background" | "exit" => Ok(Self::ForegroundExit),
            _ => Err(UnknownUsageEventKind(s.to_string())),
        }
    }
}

impl Serialize for UsageEventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for UsageEventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown usage event kind strings.
#[derive(Debug, Clone)]
pub struct UnknownUsageEventKind(String);

impl fmt::Display for UnknownUsageEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown usage event kind: {}", self.0)
    }
}

impl std::error::Error for UnknownUsageEventKind {}

/// A single entry from the system usage-event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Foreground transition direction.
    #[serde(rename = "type")]
    pub kind: UsageEventKind,
    /// The app the event refers to.
    pub package: PackageId,
}

impl UsageEvent {
    pub const fn new(timestamp: DateTime<Utc>, kind: UsageEventKind, package: PackageId) -> Self {
        Self {
            timestamp,
            kind,
            package,
        }
    }
}

/// Set of packages whose foreground time counts as a candidate session.
#[derive(Debug, Clone, Default)]
pub struct MediaAllowlist {
    packages: HashSet<String>,
}

impl MediaAllowlist {
    /// Builds an allowlist, skipping empty entries.
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let packages = packages
            .into_iter()
            .filter_map(|p| {
                let p = p.as_ref().trim();
                if p.is_empty() {
                    tracing::warn!("ignoring empty media package entry");
                    None
                } else {
                    Some(p.to_string())
                }
            })
            .collect();
        Self { packages }
    }

    pub fn contains(&self, package: &PackageId) -> bool {
        self.packages.contains(package.as_str())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
