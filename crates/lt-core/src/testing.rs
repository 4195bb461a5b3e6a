//! In-memory collaborators for unit tests.

use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::ports::{
    BoxError, Clock, ReconciliationState, ReconciliationStore, SessionSink, UsageEventLog,
    VolumeSource,
};
use crate::session::SessionRecord;
use crate::signal::VolumeReading;
use crate::types::{PackageId, Percentage};
use crate::usage::{UsageEvent, UsageEventKind};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

pub fn usage(offset_secs: i64, kind: UsageEventKind, package: &str) -> UsageEvent {
    UsageEvent::new(
        t0() + Duration::seconds(offset_secs),
        kind,
        PackageId::new(package).unwrap(),
    )
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub struct StubVolume(Mutex<Option<VolumeReading>>);

impl StubVolume {
    pub const fn new(level: i32, max: i32) -> Self {
        Self(Mutex::new(Some(VolumeReading::new(level, max))))
    }

    pub fn set(&self, level: i32, max: i32) {
        *self.0.lock().unwrap() = Some(VolumeReading::new(level, max));
    }

    pub fn fail(&self) {
        *self.0.lock().unwrap() = None;
    }
}

impl VolumeSource for StubVolume {
    fn current_volume(&self) -> Result<VolumeReading, BoxError> {
        self.0
            .lock()
            .unwrap()
            .ok_or_else(|| "audio service unavailable".into())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<SessionRecord>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

impl SessionSink for RecordingSink {
    fn session_completed(&self, record: &SessionRecord) -> Result<(), BoxError> {
        if *self.failing.lock().unwrap() {
            return Err("sink disconnected".into());
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<ReconciliationState>,
    connection_writes: Mutex<Vec<bool>>,
    failing_reads: Mutex<bool>,
    failing_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn with_state(state: ReconciliationState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    pub fn state(&self) -> ReconciliationState {
        *self.state.lock().unwrap()
    }

    pub fn connection_writes(&self) -> Vec<bool> {
        self.connection_writes.lock().unwrap().clone()
    }

    pub fn fail_reads(&self) {
        *self.failing_reads.lock().unwrap() = true;
    }

    pub fn fail_writes(&self) {
        *self.failing_writes.lock().unwrap() = true;
    }
}

impl ReconciliationStore for MemoryStore {
    fn load(&self) -> Result<ReconciliationState, BoxError> {
        if *self.failing_reads.lock().unwrap() {
            return Err("state unreadable".into());
        }
        Ok(self.state())
    }

    fn record_connection(&self, connected: bool) -> Result<(), BoxError> {
        if *self.failing_writes.lock().unwrap() {
            return Err("state unwritable".into());
        }
        self.connection_writes.lock().unwrap().push(connected);
        self.state.lock().unwrap().last_connected = connected;
        Ok(())
    }

    fn record_session_end(
        &self,
        ended_at: DateTime<Utc>,
        average_volume: Percentage,
    ) -> Result<(), BoxError> {
        if *self.failing_writes.lock().unwrap() {
            return Err("state unwritable".into());
        }
        let mut state = self.state.lock().unwrap();
        state.last_session_end = Some(state.last_session_end.map_or(ended_at, |e| e.max(ended_at)));
        state.last_average_volume = Some(average_volume);
        Ok(())
    }
}

#[derive(Default)]
pub struct VecLog {
    events: Vec<UsageEvent>,
    failing: bool,
    queries: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl VecLog {
    pub fn new(events: Vec<UsageEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.queries.lock().unwrap().clone()
    }
}

impl UsageEventLog for VecLog {
    fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<UsageEvent>, BoxError> {
        self.queries.lock().unwrap().push((from, to));
        if self.failing {
            return Err("usage log unavailable".into());
        }
        Ok(self
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect())
    }
}
