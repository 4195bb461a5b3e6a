//! Session sink that stores completed sessions and prints their payload.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use lt_core::{BoxError, SessionRecord, SessionSink};
use lt_db::SharedDatabase;

/// Writes one JSON payload line per completed session and stores it.
///
/// A session that is already stored (same bounds) is neither printed nor
/// stored again.
pub struct StoringSink<W> {
    db: SharedDatabase,
    out: Mutex<W>,
}

impl<W: Write + Send> StoringSink<W> {
    pub const fn new(db: SharedDatabase, out: W) -> Self {
        Self {
            db,
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> SessionSink for StoringSink<W> {
    fn session_completed(&self, record: &SessionRecord) -> Result<(), BoxError> {
        if !self.db.lock().insert_session(record)? {
            tracing::debug!(started_at = %record.started_at, "session already stored");
            return Ok(());
        }
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        write_payload(&mut *out, record)?;
        Ok(())
    }
}

/// Writes a session as a single JSON line.
pub fn write_payload<W: Write + ?Sized>(out: &mut W, record: &SessionRecord) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    writeln!(out)?;
    out.flush()
}
