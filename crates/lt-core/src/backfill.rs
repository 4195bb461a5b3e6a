//! Reconstruction of sessions missed while the monitor was not running.
//!
//! # Algorithm Summary
//!
//! 1. Skip if the last live session ended less than `min_gap` ago
//! 2. Skip if no accessory was connected at the last connectivity edge
//! 3. Replay foreground enter/exit events since the last session end, tracking
//!    at most one allow-listed app at a time
//! 4. Keep intervals of at least `min_session`, including one still open at
//!    `now`, and emit them as estimated sessions

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::BackfillConfig;
use crate::ports::{BoxError, ReconciliationState, ReconciliationStore, SessionSink, UsageEventLog};
use crate::session::SessionRecord;
use crate::types::{PackageId, Percentage};
use crate::usage::{MediaAllowlist, UsageEvent, UsageEventKind};

/// Reasons a reconciliation pass aborts before emitting anything.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("failed to load reconciliation state: {0}")]
    State(#[source] BoxError),
    #[error("failed to query usage events: {0}")]
    EventLog(#[source] BoxError),
}

/// Why a pass decided there was nothing to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The last session ended too recently to indicate an outage.
    RecentGap { gap: Duration },
    /// No accessory was connected when monitoring stopped.
    Disconnected,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    Skipped(SkipReason),
    Recovered(Vec<SessionRecord>),
    /// A read failed; nothing was emitted.
    Aborted,
}

impl BackfillOutcome {
    /// Sessions recovered by the pass, empty unless it recovered any.
    pub fn sessions(&self) -> &[SessionRecord] {
        match self {
            Self::Recovered(records) => records,
            Self::Skipped(_) | Self::Aborted => &[],
        }
    }
}

/// Replays a usage-event stream into estimated session records.
///
/// Events must be sorted by timestamp ascending. Records come back in
/// chronological order.
pub fn reconstruct_sessions(
    events: &[UsageEvent],
    now: DateTime<Utc>,
    allowlist: &MediaAllowlist,
    min_session: Duration,
    volume: Percentage,
) -> Vec<SessionRecord> {
    let mut records = Vec::new();
    let mut candidate: Option<(&PackageId, DateTime<Utc>)> = None;

    for event in events {
        match event.kind {
            UsageEventKind::ForegroundEnter => {
                if !allowlist.contains(&event.package) {
                    continue;
                }
                if let Some((previous, _)) = candidate {
                    if previous != &event.package {
                        tracing::debug!(
                            %previous,
                            next = %event.package,
                            "foreground entered without exit; dropping candidate"
                        );
                    }
                }
                candidate = Some((&event.package, event.timestamp));
            }
            UsageEventKind::ForegroundExit => {
                let Some((package, started_at)) = candidate else {
                    continue;
                };
                if package != &event.package {
                    continue;
                }
                candidate = None;
                if event.timestamp - started_at >= min_session {
                    tracing::debug!(%package, %started_at, ended_at = %event.timestamp, "recovered session");
                    records.push(SessionRecord::estimated(started_at, event.timestamp, volume));
                }
            }
        }
    }

    if let Some((package, started_at)) = candidate {
        if now - started_at >= min_session {
            tracing::debug!(%package, %started_at, "recovered session still in foreground");
            records.push(SessionRecord::estimated(started_at, now, volume));
        }
    }

    records
}

/// One-shot reconciliation pass over the usage-event log.
pub struct Reconciler<'a> {
    config: &'a BackfillConfig,
    store: &'a dyn ReconciliationStore,
    log: &'a dyn UsageEventLog,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        config: &'a BackfillConfig,
        store: &'a dyn ReconciliationStore,
        log: &'a dyn UsageEventLog,
    ) -> Self {
        Self { config, store, log }
    }

    /// Computes the sessions a pass at `now` would recover, without emitting.
    ///
    /// Failures are logged and reported as [`BackfillOutcome::Aborted`].
    pub fn plan(&self, now: DateTime<Utc>) -> BackfillOutcome {
        match self.try_plan(now) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "backfill aborted");
                BackfillOutcome::Aborted
            }
        }
    }

    /// Runs a pass at `now` and delivers recovered sessions to `sink` in
    /// chronological order.
    ///
    /// Reconciliation state is left untouched.
    pub fn run(&self, now: DateTime<Utc>, sink: &dyn SessionSink) -> BackfillOutcome {
        let outcome = self.plan(now);
        let records = outcome.sessions();
        for record in records {
            if let Err(err) = sink.session_completed(record) {
                tracing::error!(error = %err, started_at = %record.started_at, "failed to deliver recovered session");
            }
        }
        if !records.is_empty() {
            tracing::info!(recovered = records.len(), "backfill completed");
        }
        outcome
    }

    fn try_plan(&self, now: DateTime<Utc>) -> Result<BackfillOutcome, BackfillError> {
        let state: ReconciliationState = self.store.load().map_err(BackfillError::State)?;

        if let Some(last_end) = state.last_session_end {
            let gap = now - last_end;
            if gap < self.config.min_gap() {
                tracing::debug!(gap_secs = gap.num_seconds(), "last session too recent; skipping backfill");
                return Ok(BackfillOutcome::Skipped(SkipReason::RecentGap { gap }));
            }
        }
        if !state.last_connected {
            tracing::debug!("accessory was disconnected; skipping backfill");
            return Ok(BackfillOutcome::Skipped(SkipReason::Disconnected));
        }

        let earliest = now - self.config.max_lookback();
        let from = match state.last_session_end {
            Some(last_end) if last_end < earliest => {
                tracing::info!(
                    %last_end,
                    %earliest,
                    "outage exceeds max lookback; older usage events are not scanned"
                );
                earliest
            }
            Some(last_end) => last_end,
            None => earliest,
        };
        tracing::info!(%from, to = %now, "scanning usage events for missed sessions");

        let mut events = self.log.query(from, now).map_err(BackfillError::EventLog)?;
        events.sort_by_key(|e| e.timestamp);

        let volume = state
            .last_average_volume
            .unwrap_or_else(|| self.config.default_average_volume());
        let records = reconstruct_sessions(
            &events,
            now,
            &self.config.allowlist(),
            self.config.min_session(),
            volume,
        );
        Ok(BackfillOutcome::Recovered(records))
    }
}
