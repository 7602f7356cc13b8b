//! Append-only history trail for tag documents.
//!
//! # Responsibility
//! - Persist one full post-mutation snapshot per successful document write.
//! - Offer a read-back path for verifying a document's trail.
//!
//! # Invariants
//! - Appends never overwrite; the trail row id orders snapshots per tag.
//! - Each snapshot carries the version token the write produced, so trail
//!   rows and store states stay correlated.

use crate::db::guard::{ensure_schema_current, ensure_table_shape};
use crate::db::DbError;
use crate::model::tag::{utc_now_ms, Tag, TagId, VersionToken};
use crate::store::tag_store::StoredTag;
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Error for history trail persistence.
#[derive(Debug)]
pub enum HistoryError {
    Db(DbError),
    InvalidData(String),
}

impl Display for HistoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid history data: {message}"),
        }
    }
}

impl Error for HistoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for HistoryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for HistoryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// History trail interface.
///
/// Append ordering across concurrent writers and dedup of replayed appends
/// are owned by the backing index, not by this core.
pub trait HistoryStore {
    /// Appends the full post-mutation document to the trail.
    fn add(&self, snapshot: &StoredTag) -> HistoryResult<()>;
}

/// One recorded snapshot read back from the trail.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub tag_id: TagId,
    pub version: VersionToken,
    pub recorded_at: i64,
    pub body: Tag,
}

/// SQLite-backed history trail.
pub struct SqliteHistoryStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteHistoryStore<'conn> {
    /// Constructs a trail writer from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> HistoryResult<Self> {
        ensure_schema_current(conn)?;
        ensure_table_shape(
            conn,
            "tag_history",
            &["tag_id", "version_term", "version_seq", "recorded_at", "body"],
        )?;
        Ok(Self { conn })
    }

    /// Reads back the trail for one tag, oldest first.
    pub fn snapshots_for(&self, tag_id: TagId) -> HistoryResult<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_id, version_term, version_seq, recorded_at, body
             FROM tag_history
             WHERE tag_id = ?1
             ORDER BY id ASC;",
        )?;

        let mut rows = stmt.query([tag_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_history_row(row)?);
        }
        Ok(records)
    }
}

impl HistoryStore for SqliteHistoryStore<'_> {
    fn add(&self, snapshot: &StoredTag) -> HistoryResult<()> {
        let body = serde_json::to_string(&snapshot.tag).map_err(|err| {
            HistoryError::InvalidData(format!(
                "snapshot body for tag {} failed to serialize: {err}",
                snapshot.id
            ))
        })?;

        self.conn.execute(
            "INSERT INTO tag_history (tag_id, version_term, version_seq, recorded_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                snapshot.id.to_string(),
                snapshot.token.term(),
                snapshot.token.seq(),
                utc_now_ms(),
                body,
            ],
        )?;

        Ok(())
    }
}

fn parse_history_row(row: &Row<'_>) -> HistoryResult<HistoryRecord> {
    let id_text: String = row.get("tag_id")?;
    let tag_id = Uuid::parse_str(&id_text).map_err(|_| {
        HistoryError::InvalidData(format!(
            "invalid uuid value `{id_text}` in tag_history.tag_id"
        ))
    })?;

    let body_text: String = row.get("body")?;
    let body: Tag = serde_json::from_str(&body_text).map_err(|err| {
        HistoryError::InvalidData(format!(
            "invalid snapshot body for tag {tag_id} in tag_history.body: {err}"
        ))
    })?;

    Ok(HistoryRecord {
        tag_id,
        version: VersionToken::new(row.get("version_term")?, row.get("version_seq")?),
        recorded_at: row.get("recorded_at")?,
        body,
    })
}
