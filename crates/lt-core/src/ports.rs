//! Collaborator interfaces the engine is wired to by its host.
//!
//! The engine never talks to a platform directly. Signal sources, the
//! persisted reconciliation state, the usage-event log and the downstream
//! sink are all injected as trait objects, so tests and hosts can supply
//! their own implementations.

use chrono::{DateTime, Utc};

use crate::session::SessionRecord;
use crate::signal::VolumeReading;
use crate::types::Percentage;
use crate::usage::UsageEvent;

/// Error type returned by collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reconciliation hints persisted across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReconciliationState {
    /// Whether an accessory was connected at the last connectivity edge.
    pub last_connected: bool,
    /// End of the most recent live session, if any was ever recorded.
    pub last_session_end: Option<DateTime<Utc>>,
    /// Average volume of the most recent live session.
    pub last_average_volume: Option<Percentage>,
}

/// Pull interface for the current output volume.
pub trait VolumeSource: Send + Sync {
    fn current_volume(&self) -> Result<VolumeReading, BoxError>;
}

/// Downstream consumer of completed sessions.
///
/// Called synchronously on the close path; implementations must not call
/// back into the engine.
pub trait SessionSink: Send + Sync {
    fn session_completed(&self, record: &SessionRecord) -> Result<(), BoxError>;
}

/// Durable key/value store holding [`ReconciliationState`].
pub trait ReconciliationStore: Send + Sync {
    fn load(&self) -> Result<ReconciliationState, BoxError>;

    /// Records a connect/disconnect edge.
    fn record_connection(&self, connected: bool) -> Result<(), BoxError>;

    /// Records the end of a live session.
    ///
    /// Implementations must keep `last_session_end` non-decreasing: an
    /// `ended_at` older than the stored value leaves the stored value in place.
    fn record_session_end(
        &self,
        ended_at: DateTime<Utc>,
        average_volume: Percentage,
    ) -> Result<(), BoxError>;
}

/// Read-only query interface over the system usage-event log.
pub trait UsageEventLog: Send + Sync {
    /// Returns events with `from <= timestamp <= to`, ordered by timestamp.
    fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<UsageEvent>, BoxError>;
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
