//! Segment: one SQLite file holding a run of events plus a full-text index.
//!
//! A segment is written by exactly one owner while active and compacted by
//! [`Segment::close`] once it is retired. Payloads are stored as the event's
//! JSON form; the timestamp and value columns are virtual projections of that
//! JSON, and an insert trigger keeps the FTS5 table in step with every row.

use crate::core::event::Event;
use crate::core::temporal::{TimeRange, Timestamp};
use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Lock-wait bound so contention fails fast
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Page size applied before the final VACUUM
pub const COMPACT_PAGE_SIZE: u32 = 1024;

/// Extension of segment files
pub const SEGMENT_EXTENSION: &str = "db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS payloads (
        id         INTEGER PRIMARY KEY,
        payload    TEXT NOT NULL,
        timestamp  INT GENERATED ALWAYS AS (payload ->> '$.time') VIRTUAL,
        value      TEXT GENERATED ALWAYS AS (payload ->> '$.value') VIRTUAL
    );
    CREATE INDEX IF NOT EXISTS payloads_timestamp ON payloads(timestamp);
    CREATE VIRTUAL TABLE IF NOT EXISTS events USING fts5(value, content=payloads, content_rowid=id);
    CREATE TRIGGER IF NOT EXISTS payloads_insert AFTER INSERT ON payloads BEGIN
        INSERT INTO events(rowid, value) VALUES (new.id, new.value);
    END;
";

const INSERT_PAYLOAD: &str = "INSERT INTO payloads (payload) VALUES (?1)";

/// Active, writable segment
pub struct Segment {
    conn: Option<Connection>,
    path: PathBuf,
    filename: String,
    records: u64,
}

impl Segment {
    /// Create (or open) the segment file at `path` and install the schema.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|e| {
            Error::Storage(format!("could not open sqlite db {}: {}", path.display(), e))
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Checkpointing is deferred to `close`.
        let _pages: i64 =
            conn.pragma_update_and_check(None, "wal_autocheckpoint", 0, |row| row.get(0))?;

        conn.execute_batch(SCHEMA).map_err(|e| {
            Error::Storage(format!("could not run migrations {}: {}", path.display(), e))
        })?;
        // Warm the statement cache so the first insert does not pay for it.
        conn.prepare_cached(INSERT_PAYLOAD)?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(segment = %path.display(), "created segment");
        Ok(Self {
            conn: Some(conn),
            path,
            filename,
            records: 0,
        })
    }

    /// Append one event. The full-text entry is written by the same statement.
    pub fn insert(&mut self, event: &Event) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::Closed("segment"))?;
        let payload = event.to_json()?;
        conn.prepare_cached(INSERT_PAYLOAD)?
            .execute([payload])
            .map_err(|e| Error::Storage(format!("could not insert payload: {}", e)))?;
        self.records += 1;
        Ok(())
    }

    /// Compact the segment and release the file.
    ///
    /// Leaves WAL mode so the page size can change, optimizes the full-text
    /// index, then VACUUMs. Fails if the segment was already closed.
    pub fn close(&mut self) -> Result<()> {
        let conn = self.conn.take().ok_or(Error::Closed("segment"))?;

        conn.flush_prepared_statement_cache();
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get(0))?;
        // SQLite reports the unchanged mode instead of failing when other
        // connections keep the file in WAL.
        if !mode.eq_ignore_ascii_case("delete") {
            return Err(Error::Storage(format!(
                "could not leave WAL mode for {}, journal mode is {}",
                self.filename, mode
            )));
        }
        conn.pragma_update(None, "page_size", COMPACT_PAGE_SIZE)?;
        conn.execute("INSERT INTO events(events) VALUES ('optimize')", [])
            .map_err(|e| Error::Storage(format!("cannot optimize the full-text index: {}", e)))?;
        conn.execute_batch("VACUUM")
            .map_err(|e| Error::Storage(format!("cannot vacuum the database: {}", e)))?;
        conn.close()
            .map_err(|(_, e)| Error::Storage(format!("cannot close database: {}", e)))?;

        debug!(segment = %self.path.display(), records = self.records, "closed segment");
        Ok(())
    }

    /// Base name of the segment file
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full path of the segment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events inserted through this handle
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("records", &self.records)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Event stored in a segment along with its row id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: i64,
    pub event: Event,
}

/// Read-only view over a segment file
pub struct SegmentReader {
    conn: Connection,
    path: PathBuf,
}

impl SegmentReader {
    /// Open an existing segment file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(Error::Storage(format!("segment {} does not exist", path.display())));
        }
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn, path })
    }

    /// Full-text search over event values, best matches first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT payloads.id, payloads.payload
             FROM events JOIN payloads ON payloads.id = events.rowid
             WHERE events MATCH ?1
             ORDER BY events.rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map((query, limit as i64), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let events = collect_events(rows)?;
        Ok(events)
    }

    /// Events whose time falls in `range`, oldest first
    pub fn between(&self, range: TimeRange) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload FROM payloads
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp, id",
        )?;
        let rows = stmt.query_map((range.start.as_nanos(), range.end.as_nanos()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let events = collect_events(rows)?;
        Ok(events)
    }

    /// Number of stored events
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM payloads", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn collect_events<I>(rows: I) -> Result<Vec<StoredEvent>>
where
    I: Iterator<Item = rusqlite::Result<(i64, String)>>,
{
    let mut events = Vec::new();
    for row in rows {
        let (id, payload) = row?;
        let event = Event::from_json(payload.as_bytes())?;
        events.push(StoredEvent { id, event });
    }
    Ok(events)
}

/// Hands out unique segment paths named after their creation time.
///
/// Names are strictly increasing nanosecond timestamps, so two rotations
/// within one clock tick (or a clock that steps backwards) still get distinct
/// files, and a name that already exists on disk is skipped.
#[derive(Debug)]
pub struct SegmentNamer {
    dir: PathBuf,
    last: i64,
}

impl SegmentNamer {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            last: i64::MIN,
        }
    }

    /// Path for the next segment: `<dir>/<nanos>.db`
    pub fn next_path(&mut self) -> PathBuf {
        let mut nanos = Timestamp::now().as_nanos().max(self.last.saturating_add(1));
        loop {
            let path = self.dir.join(format!("{nanos}.{SEGMENT_EXTENSION}"));
            if !path.exists() {
                self.last = nanos;
                return path;
            }
            nanos += 1;
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Whether `path` looks like a segment file produced by [`SegmentNamer`]
pub fn is_segment_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match name.strip_suffix(SEGMENT_EXTENSION).and_then(|n| n.strip_suffix('.')) {
        Some(stem) => !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
