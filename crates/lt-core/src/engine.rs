//! Live session detection.
//!
//! The [`Engine`] aggregates the three listening signals into a
//! [`SignalSnapshot`], runs the `Idle`/`Tracking` state machine on every
//! update, samples volume while a session is open, and emits a
//! [`SessionRecord`] when the session closes.
//!
//! # Concurrency
//!
//! All session-state mutation happens under one mutex, so signal updates, the
//! backstop tick and the volume sampler are serialized and never observe a
//! half-updated snapshot. The lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::ports::{Clock, ReconciliationStore, SessionSink, VolumeSource};
use crate::sampler::Sampler;
use crate::session::{SessionRecord, SessionState};
use crate::signal::{SignalSnapshot, VolumeReading};

/// The collaborators an [`Engine`] is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub volume: Arc<dyn VolumeSource>,
    pub sink: Arc<dyn SessionSink>,
    pub store: Arc<dyn ReconciliationStore>,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of one evaluation of the tracking predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing changed.
    None,
    /// `Idle -> Tracking`.
    Opened { started_at: DateTime<Utc> },
    /// `Tracking -> Idle`, with the record that was emitted.
    Closed(SessionRecord),
}

#[derive(Debug)]
enum Phase {
    Idle,
    Tracking {
        session: u64,
        accumulator: SessionState,
    },
}

/// Mutable state owned by the engine.
#[derive(Debug)]
pub struct EngineState {
    snapshot: SignalSnapshot,
    last_connected: Option<bool>,
    phase: Phase,
    sampler: Option<Sampler>,
    sessions_opened: u64,
    samplers_started: u64,
    running: bool,
}

impl EngineState {
    const fn new() -> Self {
        Self {
            snapshot: SignalSnapshot {
                accessory_connected: false,
                playback_active: false,
                volume_level: VolumeReading::SILENT.level,
                volume_max: VolumeReading::SILENT.max,
            },
            last_connected: None,
            phase: Phase::Idle,
            sampler: None,
            sessions_opened: 0,
            samplers_started: 0,
            running: true,
        }
    }
}

struct Shared {
    config: EngineConfig,
    collaborators: Collaborators,
    state: Mutex<EngineState>,
    shutdown: CancellationToken,
}

/// Handle to a running session engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                state: Mutex::new(EngineState::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Accessory attach/detach.
    ///
    /// The first observation and every change are persisted as the last known
    /// connection state.
    pub fn update_connection(&self, connected: bool) -> Transition {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.running {
            tracing::debug!(connected, "engine stopped; ignoring connection update");
            return Transition::None;
        }
        if state.last_connected != Some(connected) {
            state.last_connected = Some(connected);
            tracing::info!(connected, "accessory connection changed");
            if let Err(err) = self.shared.collaborators.store.record_connection(connected) {
                tracing::warn!(error = %err, "failed to persist connection state");
            }
        }
        state.snapshot.accessory_connected = connected;
        self.evaluate(state)
    }

    /// Audible playback started or stopped.
    pub fn update_playback(&self, active: bool) -> Transition {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.running {
            tracing::debug!(active, "engine stopped; ignoring playback update");
            return Transition::None;
        }
        state.snapshot.playback_active = active;
        self.evaluate(state)
    }

    /// Output volume changed. The new level is pulled from the volume source.
    pub fn volume_changed(&self) -> Transition {
        self.on_tick()
    }

    /// Payload-free re-evaluation.
    pub fn on_tick(&self) -> Transition {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.running {
            return Transition::None;
        }
        self.evaluate(state)
    }

    /// Stops the engine, closing any open session before returning.
    ///
    /// Delivery to the sink and the reconciliation-state write both complete
    /// on the calling thread. Later signal updates are ignored.
    pub fn shutdown(&self) -> Option<SessionRecord> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.running {
            return None;
        }
        state.running = false;
        self.shared.shutdown.cancel();
        let record = self.close(state);
        tracing::info!(closed_session = record.is_some(), "engine stopped");
        record
    }

    /// Runs the backstop tick until [`Engine::shutdown`] is called.
    pub async fn run_ticks(&self) {
        let mut ticker = time::interval(self.shared.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick();
                }
                () = self.shared.shutdown.cancelled() => break,
            }
        }
        tracing::debug!("tick loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.lock().phase, Phase::Tracking { .. })
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        self.lock().snapshot
    }

    /// A copy of the open session's accumulator, if tracking.
    pub fn current_session(&self) -> Option<SessionState> {
        match &self.lock().phase {
            Phase::Idle => None,
            Phase::Tracking { accumulator, .. } => Some(accumulator.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_volume(&self) -> VolumeReading {
        match self.shared.collaborators.volume.current_volume() {
            Ok(reading) => reading,
            Err(err) => {
                tracing::warn!(error = %err, "volume unavailable; treating as silent");
                VolumeReading::SILENT
            }
        }
    }

    fn evaluate(&self, state: &mut EngineState) -> Transition {
        state.snapshot.set_volume(self.read_volume());
        let should_track = state.snapshot.should_track();
        let tracking = matches!(state.phase, Phase::Tracking { .. });
        tracing::trace!(snapshot = ?state.snapshot, should_track, tracking, "evaluated signals");

        let transition = match (tracking, should_track) {
            (false, true) => self.open(state),
            (true, false) => self.close(state).map_or(Transition::None, Transition::Closed),
            _ => Transition::None,
        };

        if should_track {
            self.ensure_sampler(state);
        } else if let Some(sampler) = state.sampler.take() {
            sampler.cancel();
        }
        transition
    }

    fn open(&self, state: &mut EngineState) -> Transition {
        if let Some(stale) = state.sampler.take() {
            stale.cancel();
        }
        let started_at = self.shared.collaborators.clock.now();
        state.sessions_opened += 1;
        let session = state.sessions_opened;

        let mut accumulator = SessionState::new(started_at);
        let first_sample = state.snapshot.volume_percentage();
        accumulator.record_sample(first_sample);
        state.phase = Phase::Tracking {
            session,
            accumulator,
        };

        tracing::info!(session, %started_at, volume = %first_sample, "session opened");
        Transition::Opened { started_at }
    }

    fn close(&self, state: &mut EngineState) -> Option<SessionRecord> {
        if let Some(sampler) = state.sampler.take() {
            sampler.cancel();
        }
        let Phase::Tracking {
            session,
            accumulator,
        } = std::mem::replace(&mut state.phase, Phase::Idle)
        else {
            return None;
        };

        let record = accumulator.finish(self.shared.collaborators.clock.now());
        tracing::info!(
            session,
            duration_secs = record.duration_secs,
            avg_volume = %record.average_volume,
            max_volume = %record.max_volume,
            "session closed"
        );
        self.emit(&record);
        Some(record)
    }

    /// Delivers a closed session and records it for the next backfill pass.
    ///
    /// Each step is attempted even if the other fails.
    fn emit(&self, record: &SessionRecord) {
        let collaborators = &self.shared.collaborators;
        if let Err(err) = collaborators.sink.session_completed(record) {
            tracing::error!(error = %err, "failed to deliver session");
        }
        if let Err(err) = collaborators
            .store
            .record_session_end(record.ended_at, record.average_volume)
        {
            tracing::error!(error = %err, "failed to persist session end");
        }
    }

    fn ensure_sampler(&self, state: &mut EngineState) {
        let Phase::Tracking { session, .. } = state.phase else {
            return;
        };
        if state
            .sampler
            .as_ref()
            .is_some_and(|s| s.session() == session && s.is_active())
        {
            return;
        }
        if let Some(stale) = state.sampler.take() {
            stale.cancel();
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        state.sampler = Sampler::spawn(session, self.shared.config.sample_interval(), move || {
            weak.upgrade()
                .is_some_and(|shared| Self { shared }.sample(session))
        });
        if state.sampler.is_some() {
            state.samplers_started += 1;
            tracing::debug!(session, "volume sampler started");
        } else {
            tracing::debug!(session, "no async runtime; volume sampler not started");
        }
    }

    /// One sampler tick. Returns `false` once the sampler should stop.
    fn sample(&self, session: u64) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.running {
            return false;
        }
        if !matches!(state.phase, Phase::Tracking { session: open, .. } if open == session) {
            return false;
        }

        let reading = self.read_volume();
        state.snapshot.set_volume(reading);
        if !state.snapshot.should_track() {
            tracing::debug!(session, "signals no longer hold while sampling");
            self.close(state);
            return false;
        }

        let volume = reading.percentage();
        if let Phase::Tracking { accumulator, .. } = &mut state.phase {
            accumulator.record_sample(volume);
        }
        tracing::debug!(session, %volume, "volume sampled");
        true
    }
}

#[cfg(test)]
impl Engine {
    fn counters(&self) -> (u64, u64) {
        let state = self.lock();
        (state.sessions_opened, state.samplers_started)
    }
}
