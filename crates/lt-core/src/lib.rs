//! Core domain logic for the listening session tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Signal aggregation: folding connection, playback and volume updates into one snapshot
//! - Session detection: the `Idle`/`Tracking` state machine and volume sampling
//! - Backfill: reconstructing sessions missed while the monitor was down

pub mod backfill;
pub mod config;
mod engine;
pub mod ports;
mod sampler;
pub mod session;
pub mod signal;
pub mod types;
pub mod usage;

#[cfg(test)]
mod testing;

pub use backfill::{BackfillError, BackfillOutcome, Reconciler, SkipReason, reconstruct_sessions};
pub use config::{BackfillConfig, EngineConfig};
pub use engine::{Collaborators, Engine, Transition};
pub use ports::{
    BoxError, Clock, ReconciliationState, ReconciliationStore, SessionSink, SystemClock,
    UsageEventLog, VolumeSource,
};
pub use session::{SessionRecord, SessionState};
pub use signal::{SignalSnapshot, VolumeReading};
pub use types::{PackageId, Percentage, ValidationError};
pub use usage::{MediaAllowlist, UsageEvent, UsageEventKind};
