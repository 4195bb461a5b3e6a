//! Backfill command: one reconciliation pass over the usage-event log.

use std::io::Write;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

use lt_core::{BackfillConfig, BackfillOutcome, Reconciler, SkipReason};
use lt_db::SharedDatabase;

use crate::sink::{StoringSink, write_payload};

/// Runs a pass at `now`, writing recovered sessions to `writer`.
///
/// With `dry_run`, sessions are printed but not stored. Status messages go
/// to stderr so `writer` only carries payload lines.
pub fn run<W: Write + Send>(
    writer: &mut W,
    db: &SharedDatabase,
    config: &BackfillConfig,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<BackfillOutcome> {
    let reconciler = Reconciler::new(config, db, db);
    let outcome = if dry_run {
        let outcome = reconciler.plan(now);
        for record in outcome.sessions() {
            write_payload(writer, record)?;
        }
        outcome
    } else {
        let sink = StoringSink::new(db.clone(), &mut *writer);
        reconciler.run(now, &sink)
    };

    match &outcome {
        BackfillOutcome::Skipped(SkipReason::RecentGap { gap }) => {
            eprintln!(
                "Skipped: last session ended {}s ago.",
                gap.num_seconds()
            );
        }
        BackfillOutcome::Skipped(SkipReason::Disconnected) => {
            eprintln!("Skipped: no accessory was connected.");
        }
        BackfillOutcome::Recovered(records) => {
            let verb = if dry_run { "Would recover" } else { "Recovered" };
            eprintln!("{verb} {} session(s).", records.len());
        }
        BackfillOutcome::Aborted => bail!("backfill aborted; see log for details"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};
    use lt_core::{PackageId, Percentage, ReconciliationStore, UsageEvent, UsageEventKind};
    use lt_db::Database;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn seeded_db() -> SharedDatabase {
        let db = SharedDatabase::new(Database::open_in_memory().unwrap());
        db.record_connection(true).unwrap();
        db.record_session_end(now() - Duration::hours(2), Percentage::new(35.0).unwrap())
            .unwrap();
        let spotify = PackageId::new("com.spotify.music").unwrap();
        let start = now() - Duration::hours(1);
        db.lock()
            .insert_usage_events(&[
                UsageEvent::new(start, UsageEventKind::ForegroundEnter, spotify.clone()),
                UsageEvent::new(
                    start + Duration::seconds(45),
                    UsageEventKind::ForegroundExit,
                    spotify,
                ),
            ])
            .unwrap();
        db
    }

    #[test]
    fn dry_run_prints_without_storing() {
        let db = seeded_db();
        let mut output = Vec::new();
        let outcome = run(&mut output, &db, &BackfillConfig::default(), now(), true).unwrap();

        assert_eq!(outcome.sessions().len(), 1);
        assert_eq!(outcome.sessions()[0].duration_secs, 45);
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 1);
        assert_eq!(db.lock().counts().unwrap().sessions, 0);
    }

    #[test]
    fn repeated_passes_store_once() {
        let db = seeded_db();
        let config = BackfillConfig::default();

        let mut first = Vec::new();
        run(&mut first, &db, &config, now(), false).unwrap();
        let mut second = Vec::new();
        run(&mut second, &db, &config, now(), false).unwrap();

        assert_eq!(db.lock().counts().unwrap().estimated_sessions, 1);
        assert_eq!(String::from_utf8(first).unwrap().lines().count(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn recent_session_skips_pass() {
        let db = seeded_db();
        db.record_session_end(now() - Duration::minutes(1), Percentage::new(35.0).unwrap())
            .unwrap();
        let mut output = Vec::new();
        let outcome = run(&mut output, &db, &BackfillConfig::default(), now(), false).unwrap();
        assert!(matches!(
            outcome,
            BackfillOutcome::Skipped(SkipReason::RecentGap { .. })
        ));
    }
}
