//! Sessions command for listing stored sessions.

use std::io::Write;

use anyhow::Result;

use lt_db::Database;

use crate::sink::write_payload;

pub fn run<W: Write>(writer: &mut W, db: &Database, json: bool, limit: Option<usize>) -> Result<()> {
    let sessions = db.list_sessions(limit)?;

    if json {
        for session in &sessions {
            write_payload(writer, &session.record)?;
        }
        return Ok(());
    }

    if sessions.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }

    for session in &sessions {
        let record = &session.record;
        let marker = if record.estimated { " (estimated)" } else { "" };
        writeln!(
            writer,
            "{}  {:>6}s  avg {:>6}  max {:>6}{marker}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.duration_secs,
            record.average_volume.to_string(),
            record.max_volume.to_string(),
        )?;
    }

    Ok(())
}
