//! SQLite persistence: person records, photo provenance, and the
//! attendance ledger.
//!
//! The ledger's once-per-day guarantee is a UNIQUE constraint on
//! `(person_id, date)`. The insert is the source of truth: a constraint
//! violation means another request already marked that person today and is
//! reported as [`AttendanceOutcome::AlreadyMarked`], never as an error.

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("roll number {0:?} is already registered")]
    DuplicateRollNumber(String),
    #[error("no person registered with roll number {0:?}")]
    UnknownRollNumber(String),
}

/// A registered person. `gallery_path` stays NULL until the first
/// enrollment commits.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub roll_number: String,
    pub department: String,
    pub year: i64,
    pub gallery_path: Option<String>,
}

/// One attendance event joined with the person it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRow {
    pub date: String,
    pub time: String,
    pub name: String,
    pub roll_number: String,
    pub department: String,
    pub year: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceOutcome {
    Recorded,
    AlreadyMarked,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS persons (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT NOT NULL,
                roll_number  TEXT UNIQUE NOT NULL,
                department   TEXT NOT NULL,
                year         INTEGER NOT NULL,
                gallery_path TEXT
            );
            CREATE TABLE IF NOT EXISTS person_photos (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id  INTEGER NOT NULL,
                photo_path TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS attendance (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                person_id INTEGER NOT NULL,
                date      TEXT NOT NULL,
                time      TEXT NOT NULL,
                UNIQUE (person_id, date)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Register a new person. The roll number must be unique.
    pub fn insert_person(
        &self,
        name: &str,
        roll_number: &str,
        department: &str,
        year: i64,
    ) -> Result<i64, DbError> {
        let result = self.conn.execute(
            "INSERT INTO persons (name, roll_number, department, year) VALUES (?1, ?2, ?3, ?4)",
            params![name, roll_number, department, year],
        );
        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(err) if is_constraint_violation(&err) => {
                Err(DbError::DuplicateRollNumber(roll_number.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn person_by_roll(&self, roll_number: &str) -> Result<Person, DbError> {
        self.conn
            .query_row(
                "SELECT id, name, roll_number, department, year, gallery_path
                 FROM persons WHERE roll_number = ?1",
                [roll_number],
                person_from_row,
            )
            .optional()?
            .ok_or_else(|| DbError::UnknownRollNumber(roll_number.to_string()))
    }

    /// Point a person at their (re)written gallery file.
    pub fn set_gallery_path(&self, person_id: i64, gallery_path: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE persons SET gallery_path = ?1 WHERE id = ?2",
            params![gallery_path, person_id],
        )?;
        Ok(())
    }

    /// Replace a person's photo provenance with the latest enrollment batch.
    /// Provenance is never read by the matching path.
    pub fn replace_photos(&self, person_id: i64, photo_paths: &[String]) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM person_photos WHERE person_id = ?1",
            [person_id],
        )?;
        let mut stmt = self
            .conn
            .prepare("INSERT INTO person_photos (person_id, photo_path) VALUES (?1, ?2)")?;
        for path in photo_paths {
            stmt.execute(params![person_id, path])?;
        }
        Ok(())
    }

    /// Persons with a committed gallery, in ascending id order. Matching
    /// enumerates in this order, so exact-distance ties resolve to the
    /// lowest person id.
    pub fn list_enrolled(&self) -> Result<Vec<Person>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, roll_number, department, year, gallery_path
             FROM persons WHERE gallery_path IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], person_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_persons(&self) -> Result<Vec<Person>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, roll_number, department, year, gallery_path
             FROM persons ORDER BY name",
        )?;
        let rows = stmt.query_map([], person_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record attendance for `person_id` on `date`, at most once per day.
    ///
    /// Safe to call any number of times per day per person; exactly one
    /// insert wins under concurrency, every later call observes
    /// `AlreadyMarked`.
    pub fn mark_attendance(
        &self,
        person_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<AttendanceOutcome, DbError> {
        let result = self.conn.execute(
            "INSERT INTO attendance (person_id, date, time) VALUES (?1, ?2, ?3)",
            params![
                person_id,
                date.format(DATE_FORMAT).to_string(),
                time.format(TIME_FORMAT).to_string()
            ],
        );
        match result {
            Ok(_) => Ok(AttendanceOutcome::Recorded),
            Err(err) if is_constraint_violation(&err) => Ok(AttendanceOutcome::AlreadyMarked),
            Err(err) => Err(err.into()),
        }
    }

    /// Attendance joined with person attributes, newest first.
    pub fn list_attendance(&self) -> Result<Vec<AttendanceRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.date, a.time, p.name, p.roll_number, p.department, p.year
             FROM attendance a
             JOIN persons p ON p.id = a.person_id
             ORDER BY a.date DESC, a.time DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceRow {
                date: row.get(0)?,
                time: row.get(1)?,
                name: row.get(2)?,
                roll_number: row.get(3)?,
                department: row.get(4)?,
                year: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        roll_number: row.get(2)?,
        department: row.get(3)?,
        year: row.get(4)?,
        gallery_path: row.get(5)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
