//! Status command for showing reconciliation state and stored totals.

use std::io::Write;

use anyhow::Result;

use lt_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let state = db.reconciliation_state()?;
    let counts = db.counts()?;

    writeln!(writer, "Listening tracker status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(
        writer,
        "Accessory connected at last check: {}",
        if state.last_connected { "yes" } else { "no" }
    )?;
    match state.last_session_end {
        Some(end) => writeln!(writer, "Last session ended: {}", end.to_rfc3339())?,
        None => writeln!(writer, "Last session ended: never")?,
    }
    match state.last_average_volume {
        Some(volume) => writeln!(writer, "Last average volume: {volume}")?,
        None => writeln!(
            writer,
            "Last average volume: unknown (backfill assumes {})",
            config.backfill.default_average_volume()
        )?,
    }
    writeln!(
        writer,
        "Sessions: {} ({} estimated)",
        counts.sessions, counts.estimated_sessions
    )?;
    writeln!(writer, "Usage events: {}", counts.usage_events)?;

    Ok(())
}
