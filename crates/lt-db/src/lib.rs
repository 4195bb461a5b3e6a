//! Storage layer for the listening session tracker.
//!
//! Provides persistence for reconciliation state, completed sessions and the
//! usage-event log using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The engine's collaborator traits require `Sync`, so [`SharedDatabase`] wraps a
//! `Database` in an `Arc<Mutex<_>>` and implements them by serializing access.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 UTC with nanosecond precision
//! (e.g., `2024-01-15T10:30:00.000000000Z`), so a stored session reads back
//! exactly as it was emitted. The fixed width keeps lexicographic ordering
//! identical to chronological ordering, so range queries can compare strings.
//!
//! ## Reconciliation State
//!
//! A small key/value table holding `last_connected`, `last_session_end` and
//! `last_avg_volume`. Writes run with `synchronous = FULL` so a session end
//! recorded during shutdown survives the process exiting right after.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use uuid::Uuid;

use lt_core::{
    BoxError, PackageId, Percentage, ReconciliationState, ReconciliationStore, SessionRecord,
    SessionSink, UsageEvent, UsageEventKind, UsageEventLog,
};

const KEY_LAST_CONNECTED: &str = "last_connected";
const KEY_LAST_SESSION_END: &str = "last_session_end";
const KEY_LAST_AVG_VOLUME: &str = "last_avg_volume";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {context}: {timestamp}")]
    TimestampParse {
        context: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value could not be interpreted.
    #[error("invalid stored value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A session row as stored in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: String,
    pub record: SessionRecord,
    pub recorded_at: DateTime<Utc>,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub sessions: u64,
    pub estimated_sessions: u64,
    pub usage_events: u64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA synchronous = FULL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reconciliation_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Completed sessions, live and estimated
            -- start_time/end_time: RFC 3339 UTC (e.g., '2024-01-15T10:30:00.000000000Z')
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                avg_volume REAL NOT NULL,
                max_volume REAL NOT NULL,
                is_estimated INTEGER NOT NULL DEFAULT 0,
                recorded_at TEXT NOT NULL,
                UNIQUE (start_time, end_time)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);

            -- Foreground transitions from the system usage log
            -- type: 'foreground_enter' or 'foreground_exit'
            CREATE TABLE IF NOT EXISTS usage_events (
                timestamp TEXT NOT NULL,
                type TEXT NOT NULL,
                package TEXT NOT NULL,
                PRIMARY KEY (timestamp, type, package)
            );

            CREATE INDEX IF NOT EXISTS idx_usage_events_timestamp ON usage_events(timestamp);
            ",
        )?;
        Ok(())
    }

    /// Loads the persisted reconciliation state, defaulting missing keys.
    pub fn reconciliation_state(&self) -> Result<ReconciliationState, DbError> {
        let last_connected = match self.get_value(KEY_LAST_CONNECTED)? {
            None => false,
            Some(value) => value.parse().map_err(|_| DbError::InvalidValue {
                key: KEY_LAST_CONNECTED.to_string(),
                value,
            })?,
        };
        let last_session_end = self
            .get_value(KEY_LAST_SESSION_END)?
            .map(|value| parse_timestamp(&value, KEY_LAST_SESSION_END))
            .transpose()?;
        let last_average_volume = match self.get_value(KEY_LAST_AVG_VOLUME)? {
            None => None,
            Some(value) => Some(
                value
                    .parse::<f64>()
                    .map(Percentage::clamped)
                    .map_err(|_| DbError::InvalidValue {
                        key: KEY_LAST_AVG_VOLUME.to_string(),
                        value,
                    })?,
            ),
        };

        Ok(ReconciliationState {
            last_connected,
            last_session_end,
            last_average_volume,
        })
    }

    /// Persists the last known accessory connection state.
    pub fn set_last_connected(&self, connected: bool) -> Result<(), DbError> {
        self.put_value(KEY_LAST_CONNECTED, &connected.to_string())
    }

    /// Records the end of a live session.
    ///
    /// `last_session_end` only moves forward; the average volume is always
    /// replaced.
    pub fn record_session_end(
        &mut self,
        ended_at: DateTime<Utc>,
        average_volume: Percentage,
    ) -> Result<(), DbError> {
        let now = format_timestamp(Utc::now());
        let tx = self.conn.transaction()?;
        let stored: Option<String> = tx
            .query_row(
                "SELECT value FROM reconciliation_state WHERE key = ?",
                [KEY_LAST_SESSION_END],
                |row| row.get(0),
            )
            .optional()?;
        let ended_at = match stored {
            Some(value) => parse_timestamp(&value, KEY_LAST_SESSION_END)?.max(ended_at),
            None => ended_at,
        };
        tx.execute(
            "INSERT OR REPLACE INTO reconciliation_state (key, value, updated_at) VALUES (?, ?, ?)",
            params![KEY_LAST_SESSION_END, format_timestamp(ended_at), now],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO reconciliation_state (key, value, updated_at) VALUES (?, ?, ?)",
            params![KEY_LAST_AVG_VOLUME, average_volume.value().to_string(), now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Inserts a completed session.
    ///
    /// Returns `false` when a session with the same bounds already exists.
    pub fn insert_session(&self, record: &SessionRecord) -> Result<bool, DbError> {
        let inserted = self.conn.execute(
            "
            INSERT OR IGNORE INTO sessions
            (id, start_time, end_time, duration_secs, avg_volume, max_volume, is_estimated, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                Uuid::new_v4().to_string(),
                format_timestamp(record.started_at),
                format_timestamp(record.ended_at),
                i64::try_from(record.duration_secs).unwrap_or(i64::MAX),
                record.average_volume.value(),
                record.max_volume.value(),
                record.estimated,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Lists sessions, most recent first.
    pub fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<StoredSession>, DbError> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(
            "
            SELECT id, start_time, end_time, duration_secs, avg_volume, max_volume, is_estimated, recorded_at
            FROM sessions
            ORDER BY start_time DESC, id ASC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(SessionRow {
                id: row.get(0)?,
                start_time: row.get(1)?,
                end_time: row.get(2)?,
                duration_secs: row.get(3)?,
                avg_volume: row.get(4)?,
                max_volume: row.get(5)?,
                is_estimated: row.get(6)?,
                recorded_at: row.get(7)?,
            })
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_stored()?);
        }
        Ok(sessions)
    }

    /// Inserts a batch of usage events, ignoring exact duplicates.
    pub fn insert_usage_events(&mut self, events: &[UsageEvent]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO usage_events (timestamp, type, package) VALUES (?, ?, ?)",
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    format_timestamp(event.timestamp),
                    event.kind.to_string(),
                    event.package.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Lists usage events within a time range.
    ///
    /// The range is inclusive of both `start` and `end`.
    pub fn usage_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, DbError> {
        if end < start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            SELECT timestamp, type, package
            FROM usage_events
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, rowid ASC
            ",
        )?;
        let rows = stmt.query_map([format_timestamp(start), format_timestamp(end)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (timestamp, kind, package) = row?;
            events.push(parse_usage_event(&timestamp, &kind, package)?);
        }
        Ok(events)
    }

    /// Counts rows in each table.
    pub fn counts(&self) -> Result<TableCounts, DbError> {
        let count = |sql: &str| -> Result<u64, DbError> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        };
        Ok(TableCounts {
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            estimated_sessions: count("SELECT COUNT(*) FROM sessions WHERE is_estimated = 1")?,
            usage_events: count("SELECT COUNT(*) FROM usage_events")?,
        })
    }

    fn get_value(&self, key: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM reconciliation_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn put_value(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO reconciliation_state (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}

struct SessionRow {
    id: String,
    start_time: String,
    end_time: String,
    duration_secs: i64,
    avg_volume: f64,
    max_volume: f64,
    is_estimated: bool,
    recorded_at: String,
}

impl SessionRow {
    fn into_stored(self) -> Result<StoredSession, DbError> {
        let context = format!("session {}", self.id);
        Ok(StoredSession {
            record: SessionRecord {
                started_at: parse_timestamp(&self.start_time, &context)?,
                ended_at: parse_timestamp(&self.end_time, &context)?,
                duration_secs: u64::try_from(self.duration_secs).unwrap_or(1),
                average_volume: Percentage::clamped(self.avg_volume),
                max_volume: Percentage::clamped(self.max_volume),
                estimated: self.is_estimated,
            },
            recorded_at: parse_timestamp(&self.recorded_at, &context)?,
            id: self.id,
        })
    }
}

/// Thread-safe handle implementing the engine's storage collaborators.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Locks the underlying database for direct access.
    pub fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionSink for SharedDatabase {
    fn session_completed(&self, record: &SessionRecord) -> Result<(), BoxError> {
        if !self.lock().insert_session(record)? {
            tracing::debug!(started_at = %record.started_at, "session already stored");
        }
        Ok(())
    }
}

impl ReconciliationStore for SharedDatabase {
    fn load(&self) -> Result<ReconciliationState, BoxError> {
        Ok(self.lock().reconciliation_state()?)
    }

    fn record_connection(&self, connected: bool) -> Result<(), BoxError> {
        Ok(self.lock().set_last_connected(connected)?)
    }

    fn record_session_end(
        &self,
        ended_at: DateTime<Utc>,
        average_volume: Percentage,
    ) -> Result<(), BoxError> {
        Ok(self.lock().record_session_end(ended_at, average_volume)?)
    }
}

impl UsageEventLog for SharedDatabase {
    fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<UsageEvent>, BoxError> {
        Ok(self.lock().usage_events_in_range(from, to)?)
    }
}

fn parse_usage_event(timestamp: &str, kind: &str, package: String) -> Result<UsageEvent, DbError> {
    let context = format!("usage event for {package}");
    let timestamp = parse_timestamp(timestamp, &context)?;
    let kind: UsageEventKind = kind.parse().map_err(|_| DbError::InvalidValue {
        key: "usage_events.type".to_string(),
        value: kind.to_string(),
    })?;
    let package = PackageId::new(package).map_err(|_| DbError::InvalidValue {
        key: "usage_events.package".to_string(),
        value: String::new(),
    })?;
    Ok(UsageEvent::new(timestamp, kind, package))
}

fn parse_timestamp(timestamp: &str, context: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            context: context.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
