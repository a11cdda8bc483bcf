//! SQLite cache persistence: WAL-mode table keyed by `(subject, kind)`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::entry::{Entry, Payload};
use super::key::{CacheKey, DataKind, SubjectId};
use super::store::BackingStore;
use crate::core::errors::{DpcError, Result};

/// Upserting backing store over a single `cache_entries` table.
pub struct SqliteBackingStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteBackingStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DpcError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for SqliteBackingStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn load(&self, key: &CacheKey) -> Result<Option<Entry>> {
        let row = self
            .conn
            .prepare_cached(
                "SELECT subject, kind, payload, cached_at FROM cache_entries
                 WHERE subject = ?1 AND kind = ?2",
            )?
            .query_row(params![key.subject.as_str(), key.kind.as_str()], read_row)
            .optional()?;
        row.map(decode_row).transpose()
    }

    fn store(&mut self, entry: &Entry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        self.conn
            .prepare_cached(
                "INSERT INTO cache_entries (subject, kind, payload, cached_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(subject, kind) DO UPDATE SET
                    payload = excluded.payload,
                    cached_at = excluded.cached_at",
            )?
            .execute(params![
                entry.key.subject.as_str(),
                entry.key.kind.as_str(),
                payload,
                entry.cached_at.to_rfc3339(),
            ])?;
        Ok(())
    }

    fn delete(&mut self, key: &CacheKey) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM cache_entries WHERE subject = ?1 AND kind = ?2")?
            .execute(params![key.subject.as_str(), key.kind.as_str()])?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Entry>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT subject, kind, payload, cached_at FROM cache_entries")?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_row(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => eprintln!("[DPC-SQLITE] skipping undecodable row: {e}"),
            }
        }
        Ok(entries)
    }
}

type RawRow = (String, String, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_row((subject, kind, payload, cached_at): RawRow) -> Result<Entry> {
    let kind: DataKind = kind.parse().map_err(|details| DpcError::Serialization {
        context: "cache kind",
        details,
    })?;
    let payload: Payload = serde_json::from_str(&payload)?;
    let cached_at = DateTime::parse_from_rfc3339(&cached_at)
        .map_err(|error| DpcError::Serialization {
            context: "cache timestamp",
            details: error.to_string(),
        })?
        .with_timezone(&Utc);
    Ok(Entry::new(
        CacheKey::new(SubjectId::new(subject), kind),
        payload,
        cached_at,
    ))
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[DPC-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            subject TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (subject, kind)
        );",
    )?;
    Ok(())
}
