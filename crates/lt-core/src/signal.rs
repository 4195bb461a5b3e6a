//! Tri-factor signal snapshot consumed by the session state machine.

use serde::{Deserialize, Serialize};

use crate::types::Percentage;

/// A raw output-volume reading from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReading {
    pub level: i32,
    pub max: i32,
}

impl VolumeReading {
    /// Reading used when the volume source is unavailable.
    pub const SILENT: Self = Self { level: 0, max: 1 };

    pub const fn new(level: i32, max: i32) -> Self {
        Self { level, max }
    }

    pub fn percentage(self) -> Percentage {
        Percentage::of_level(self.level, self.max)
    }
}

/// Current view of the three listening signals.
///
/// Overwritten on every update; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSnapshot {
    pub accessory_connected: bool,
    pub playback_active: bool,
    pub volume_level: i32,
    pub volume_max: i32,
}

impl Default for SignalSnapshot {
    fn default() -> Self {
        Self {
            accessory_connected: false,
            playback_active: false,
            volume_level: VolumeReading::SILENT.level,
            volume_max: VolumeReading::SILENT.max,
        }
    }
}

impl SignalSnapshot {
    /// Whether the snapshot describes active listening.
    pub const fn should_track(&self) -> bool {
        self.accessory_connected && self.volume_level > 0 && self.playback_active
    }

    pub const fn set_volume(&mut self, reading: VolumeReading) {
        self.volume_level = reading.level;
        self.volume_max = reading.max;
    }

    pub const fn volume(&self) -> VolumeReading {
        VolumeReading::new(self.volume_level, self.volume_max)
    }

    pub fn volume_percentage(&self) -> Percentage {
        self.volume().percentage()
    }
}
