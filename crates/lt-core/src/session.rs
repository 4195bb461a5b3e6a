//! Listening sessions: the open accumulator and the completed record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Percentage;

/// Whole seconds between two instants, never less than one.
///
/// Equal or inverted timestamps (clock skew) still yield a one-second session.
pub fn duration_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_seconds()).unwrap_or(0).max(1)
}

/// Accumulator for an open session.
///
/// Exists only while the state machine is tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    started_at: DateTime<Utc>,
    samples: Vec<Percentage>,
    max_volume: Percentage,
}

impl SessionState {
    pub const fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            samples: Vec::new(),
            max_volume: Percentage::ZERO,
        }
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Appends a volume sample and updates the running maximum.
    pub fn record_sample(&mut self, sample: Percentage) {
        self.samples.push(sample);
        if sample > self.max_volume {
            self.max_volume = sample;
        }
    }

    pub fn samples(&self) -> &[Percentage] {
        &self.samples
    }

    pub const fn max_volume(&self) -> Percentage {
        self.max_volume
    }

    /// Mean of all samples, or zero when none were taken.
    #[expect(
        clippy::cast_precision_loss,
        reason = "sample counts stay far below 2^52"
    )]
    pub fn average_volume(&self) -> Percentage {
        if self.samples.is_empty() {
            return Percentage::ZERO;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value()).sum();
        Percentage::clamped(sum / self.samples.len() as f64)
    }

    /// Closes the session at `ended_at` and produces a measured record.
    pub fn finish(self, ended_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            started_at: self.started_at,
            ended_at,
            duration_secs: duration_seconds(self.started_at, ended_at),
            average_volume: self.average_volume(),
            max_volume: self.max_volume,
            estimated: false,
        }
    }
}

/// A completed listening session, as delivered to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "startTime")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub ended_at: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_secs: u64,
    #[serde(rename = "avgVolume")]
    pub average_volume: Percentage,
    #[serde(rename = "maxVolume")]
    pub max_volume: Percentage,
    /// Set for backfilled sessions whose volume figures are inferred.
    #[serde(
        rename = "isEstimated",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub estimated: bool,
}

impl SessionRecord {
    /// Builds a backfilled record whose volume statistics come from the last
    /// measured session.
    pub fn estimated(
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        volume: Percentage,
    ) -> Self {
        Self {
            started_at,
            ended_at,
            duration_secs: duration_seconds(started_at, ended_at),
            average_volume: volume,
            max_volume: volume,
            estimated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};
    use insta::assert_snapshot;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn pct(value: f64) -> Percentage {
        Percentage::new(value).unwrap()
    }

    #[test]
    #[expect(
        clippy::float_cmp,
        reason = "exact equality intended for single-sample statistics"
    )]
    fn single_sample_sets_average_and_max() {
        let mut state = SessionState::new(t0());
        state.record_sample(pct(40.0));

        let record = state.finish(t0() + Duration::seconds(10));
        assert_eq!(record.average_volume.value(), 40.0);
        assert_eq!(record.max_volume.value(), 40.0);
        assert!(!record.estimated);
    }

    #[test]
    #[expect(
        clippy::float_cmp,
        reason = "exact equality intended for integral sample means"
    )]
    fn multiple_samples_average_and_track_max() {
        let mut state = SessionState::new(t0());
        for sample in [20.0, 60.0, 40.0] {
            state.record_sample(pct(sample));
        }

        assert_eq!(state.samples().len(), 3);
        let record = state.finish(t0() + Duration::seconds(15));
        assert_eq!(record.average_volume.value(), 40.0);
        assert_eq!(record.max_volume.value(), 60.0);
        assert_eq!(record.duration_secs, 15);
    }

    #[test]
    fn empty_session_reports_zero_volume() {
        let state = SessionState::new(t0());
        let record = state.finish(t0() + Duration::seconds(3));
        assert_eq!(record.average_volume, Percentage::ZERO);
        assert_eq!(record.max_volume, Percentage::ZERO);
    }

    #[test]
    fn duration_is_never_zero() {
        assert_eq!(duration_seconds(t0(), t0()), 1);
        assert_eq!(duration_seconds(t0(), t0() + Duration::milliseconds(999)), 1);
        assert_eq!(duration_seconds(t0(), t0() - Duration::seconds(30)), 1);
        assert_eq!(duration_seconds(t0(), t0() + Duration::milliseconds(2_500)), 2);
    }

    #[test]
    fn live_payload_omits_estimated_flag() {
        let mut state = SessionState::new(t0());
        for sample in [20.0, 60.0, 40.0] {
            state.record_sample(pct(sample));
        }
        let record = state.finish(t0() + Duration::seconds(45));

        let json = serde_json::to_string(&record).unwrap();
        assert_snapshot!(json, @r#"{"startTime":"2025-03-01T08:00:00Z","endTime":"2025-03-01T08:00:45Z","duration":45,"avgVolume":40.0,"maxVolume":60.0}"#);
    }

    #[test]
    fn estimated_payload_carries_flag() {
        let record = SessionRecord::estimated(t0(), t0() + Duration::seconds(45), pct(55.0));

        let json = serde_json::to_string(&record).unwrap();
        assert_snapshot!(json, @r#"{"startTime":"2025-03-01T08:00:00Z","endTime":"2025-03-01T08:00:45Z","duration":45,"avgVolume":55.0,"maxVolume":55.0,"isEstimated":true}"#);
    }

    #[test]
    fn payload_deserializes_without_estimated_flag() {
        let json = r#"{"startTime":"2025-03-01T08:00:00+01:00","endTime":"2025-03-01T08:01:00+01:00","duration":60,"avgVolume":30.5,"maxVolume":50.0}"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert!(!record.estimated);
        assert_eq!(record.started_at, t0() - Duration::hours(1));
    }
}
