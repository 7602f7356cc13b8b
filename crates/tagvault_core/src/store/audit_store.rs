//! Append-only audit trail for tag mutations.
//!
//! # Responsibility
//! - Persist one audit entry per successful document mutation.
//! - Offer a read-back path for verifying a document's trail.
//!
//! # Invariants
//! - Appends never overwrite; trail row id orders entries per tag.
//! - Reference mutations land as `update` with the concrete action under
//!   the subcomponent columns.

use crate::db::guard::{ensure_schema_current, ensure_table_shape};
use crate::db::DbError;
use crate::model::audit::{AuditAction, AuditEntry};
use crate::model::tag::{utc_now_ms, TagId, VersionToken};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type AuditResult<T> = Result<T, AuditError>;

/// Error for audit trail persistence.
#[derive(Debug)]
pub enum AuditError {
    Db(DbError),
    InvalidData(String),
}

impl Display for AuditError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid audit data: {message}"),
        }
    }
}

impl Error for AuditError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for AuditError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for AuditError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Audit trail interface.
pub trait AuditStore {
    /// Appends one completed entry to the trail.
    fn add(&self, entry: &AuditEntry) -> AuditResult<()>;
}

/// One audit entry read back from the trail. Labels come back as owned
/// strings since the trail outlives the process that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub component: String,
    pub subcomponent: Option<String>,
    pub subcomponent_action: Option<AuditAction>,
    pub message: String,
    pub tag_id: TagId,
    pub version: VersionToken,
    pub user: String,
    pub recorded_at: i64,
}

/// SQLite-backed audit trail.
pub struct SqliteAuditStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditStore<'conn> {
    /// Constructs a trail writer from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> AuditResult<Self> {
        ensure_schema_current(conn)?;
        ensure_table_shape(
            conn,
            "audit_log",
            &[
                "action",
                "component",
                "subcomponent",
                "subcomponent_action",
                "message",
                "tag_id",
                "version_term",
                "version_seq",
                "user",
                "recorded_at",
            ],
        )?;
        Ok(Self { conn })
    }

    /// Reads back the trail for one tag, oldest first.
    pub fn entries_for(&self, tag_id: TagId) -> AuditResult<Vec<AuditRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                action,
                component,
                subcomponent,
                subcomponent_action,
                message,
                tag_id,
                version_term,
                version_seq,
                user,
                recorded_at
             FROM audit_log
             WHERE tag_id = ?1
             ORDER BY id ASC;",
        )?;

        let mut rows = stmt.query([tag_id.to_string()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_audit_row(row)?);
        }
        Ok(records)
    }
}

impl AuditStore for SqliteAuditStore<'_> {
    fn add(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.conn.execute(
            "INSERT INTO audit_log (
                action,
                component,
                subcomponent,
                subcomponent_action,
                message,
                tag_id,
                version_term,
                version_seq,
                user,
                recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                entry.action.as_str(),
                entry.component,
                entry.subcomponent,
                entry.subcomponent_action.map(AuditAction::as_str),
                entry.message.as_str(),
                entry.tag_id.to_string(),
                entry.version.term(),
                entry.version.seq(),
                entry.user.as_str(),
                utc_now_ms(),
            ],
        )?;

        Ok(())
    }
}

fn parse_audit_row(row: &Row<'_>) -> AuditResult<AuditRecord> {
    let id_text: String = row.get("tag_id")?;
    let tag_id = Uuid::parse_str(&id_text).map_err(|_| {
        AuditError::InvalidData(format!("invalid uuid value `{id_text}` in audit_log.tag_id"))
    })?;

    let action_text: String = row.get("action")?;
    let action = parse_audit_action(&action_text).ok_or_else(|| {
        AuditError::InvalidData(format!(
            "invalid action `{action_text}` in audit_log.action"
        ))
    })?;

    let subcomponent_action = match row.get::<_, Option<String>>("subcomponent_action")? {
        Some(value) => Some(parse_audit_action(&value).ok_or_else(|| {
            AuditError::InvalidData(format!(
                "invalid action `{value}` in audit_log.subcomponent_action"
            ))
        })?),
        None => None,
    };

    Ok(AuditRecord {
        action,
        component: row.get("component")?,
        subcomponent: row.get("subcomponent")?,
        subcomponent_action,
        message: row.get("message")?,
        tag_id,
        version: VersionToken::new(row.get("version_term")?, row.get("version_seq")?),
        user: row.get("user")?,
        recorded_at: row.get("recorded_at")?,
    })
}

fn parse_audit_action(value: &str) -> Option<AuditAction> {
    match value {
        "create" => Some(AuditAction::Create),
        "update" => Some(AuditAction::Update),
        "delete" => Some(AuditAction::Delete),
        _ => None,
    }
}
