//! rollcall-store — Durable state for the attendance system.
//!
//! Two stores with disjoint ownership: the gallery store owns per-person
//! embedding files and their serialized format; the database owns person
//! records, photo provenance, and the once-per-day attendance ledger.

pub mod db;
pub mod gallery;

pub use db::{AttendanceOutcome, AttendanceRow, Database, DbError, Person};
pub use gallery::{GalleryError, GalleryStore};
