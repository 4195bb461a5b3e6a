//! Usage commands for appending to the usage-event log.

use std::io::BufRead;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use lt_core::{PackageId, UsageEvent, UsageEventKind};
use lt_db::Database;

/// Records a single foreground transition.
pub fn add(
    db: &mut Database,
    package: &str,
    kind: UsageEventKind,
    at: DateTime<Utc>,
) -> Result<bool> {
    let package = PackageId::new(package.trim()).context("invalid package")?;
    let inserted = db.insert_usage_events(&[UsageEvent::new(at, kind, package)])?;
    Ok(inserted > 0)
}

/// Imports JSON-lines usage events, returning how many were new.
pub fn import<R: BufRead>(db: &mut Database, reader: R) -> Result<usize> {
    let events = parse_events(reader)?;
    let inserted = db.insert_usage_events(&events)?;
    tracing::info!(read = events.len(), inserted, "imported usage events");
    Ok(inserted)
}

fn parse_events<R: BufRead>(reader: R) -> Result<Vec<UsageEvent>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: UsageEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid usage event on line {}", idx + 1))?;
        if event.package.as_str().trim().is_empty() {
            anyhow::bail!("empty package on line {}", idx + 1);
        }
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn import_accepts_platform_event_names() {
        let mut db = Database::open_in_memory().unwrap();
        let input = r#"
{"timestamp":"2025-03-01T08:00:00Z","type":"move_to_foreground","package":"com.spotify.music"}

{"timestamp":"2025-03-01T08:00:45.250Z","type":"foreground_exit","package":"com.spotify.music"}
"#;
        assert_eq!(import(&mut db, input.as_bytes()).unwrap(), 2);
        assert_eq!(import(&mut db, input.as_bytes()).unwrap(), 0);

        let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let events = db
            .usage_events_in_range(start, start + chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(events[0].kind, UsageEventKind::ForegroundEnter);
        assert_eq!(events[1].kind, UsageEventKind::ForegroundExit);
    }

    #[test]
    fn import_reports_bad_line_number() {
        let mut db = Database::open_in_memory().unwrap();
        let input = "{\"timestamp\":\"2025-03-01T08:00:00Z\",\"type\":\"sideways\",\"package\":\"a\"}\n";
        let err = import(&mut db, input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn add_rejects_blank_package() {
        let mut db = Database::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        assert!(add(&mut db, " ", UsageEventKind::ForegroundEnter, at).is_err());
        assert!(add(&mut db, "com.gaana", UsageEventKind::ForegroundEnter, at).unwrap());
    }
}
