//! # Database models
//!
//! Row types that map to the SQLite schema used by
//! [`SqliteStore`](crate::store::SqliteStore) via **Diesel**.
//!
//! ## Tables
//!
//! - `subjects`: one row per subject, holding the learned preference vector
//!   (a `bincode` blob) and its sample count.
//! - `items`: one row per item, holding the raw payload handed to the
//!   embedding oracle, the embedding blob (if any), the attribute tag and
//!   display metadata.
//! - `ratings`: set membership of items in a subject's liked/disliked sets.
//!   The primary key spans all three columns so `INSERT OR IGNORE` makes
//!   set-adds idempotent.
//!
//! The tables are created on first connection by
//! [`SqliteStore::open`](crate::store::SqliteStore::open) using [`SCHEMA_SQL`].
use diesel::prelude::*;

/// DDL executed on every open; every statement is idempotent.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS subjects (
    id TEXT PRIMARY KEY NOT NULL,
    preference BLOB,
    sample_count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    payload BLOB NOT NULL,
    embedding BLOB,
    attribute TEXT,
    filename TEXT,
    content_type TEXT
);
CREATE TABLE IF NOT EXISTS ratings (
    subject_id TEXT NOT NULL REFERENCES subjects(id),
    item_id TEXT NOT NULL,
    verdict TEXT NOT NULL,
    PRIMARY KEY (subject_id, item_id, verdict)
);
";

/// Value stored in `ratings.verdict` for liked items.
pub const VERDICT_LIKED: &str = "liked";
/// Value stored in `ratings.verdict` for passed items.
pub const VERDICT_DISLIKED: &str = "disliked";

/// A subject row.
///
/// `preference` is `NULL` exactly when `sample_count` is `0`.
#[derive(Queryable, Selectable, Insertable, Debug, PartialEq)]
#[diesel(table_name = crate::schema::subjects)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubjectRow {
    pub id: String,
    /// `bincode`-encoded `Vec<f32>`.
    pub preference: Option<Vec<u8>>,
    pub sample_count: i32,
}

/// An item row without its payload.
///
/// Listing never needs the raw bytes, so they are only loaded on demand.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ItemRow {
    pub id: i32,
    /// `bincode`-encoded `Vec<f32>`.
    pub embedding: Option<Vec<u8>>,
    pub attribute: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Insertable form of an item; `id` is assigned by SQLite.
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::items)]
pub struct NewItemRow {
    pub payload: Vec<u8>,
    pub embedding: Option<Vec<u8>>,
    pub attribute: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Membership of `item_id` in one of a subject's rating sets.
#[derive(Queryable, Insertable, Debug, PartialEq)]
#[diesel(table_name = crate::schema::ratings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RatingRow {
    pub subject_id: String,
    pub item_id: String,
    /// [`VERDICT_LIKED`] or [`VERDICT_DISLIKED`].
    pub verdict: String,
}
