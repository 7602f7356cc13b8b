//! Versioned tag document store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide token-guarded read/write plus count/search over the canonical
//!   `tags` document table.
//! - Keep SQL and JSON-path details inside the persistence boundary.
//!
//! # Invariants
//! - Every successful read and write returns the document together with its
//!   current version token.
//! - A conditional write with a stale token fails with `Conflict` and leaves
//!   the stored row untouched.
//! - Caller-supplied field names are restricted to `[A-Za-z0-9_]+` before
//!   they reach a JSON path.

use crate::db::guard::{ensure_schema_current, ensure_table_shape};
use crate::db::DbError;
use crate::model::tag::{Tag, TagId, VersionToken};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const TAG_SELECT_SQL: &str = "SELECT
    id,
    body,
    version_term,
    version_seq
FROM tags";

const TAGS_DEFAULT_LIMIT: u32 = 10;
const TAGS_LIMIT_MAX: u32 = 50;

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("field name pattern compiles"));

pub type StoreResult<T> = Result<T, StoreError>;

/// Generic store error for document persistence and query operations.
#[derive(Debug)]
pub enum StoreError {
    NotFound(TagId),
    /// Optimistic-concurrency failure: the supplied token no longer matches
    /// the stored one, or an insert collided with an existing id.
    Conflict {
        id: TagId,
        supplied: Option<VersionToken>,
    },
    Validation(String),
    Db(DbError),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "tag not found: {id}"),
            Self::Conflict {
                id,
                supplied: Some(token),
            } => write!(f, "conflicting write for tag {id}: token {token} is stale"),
            Self::Conflict { id, supplied: None } => {
                write!(f, "conflicting write for tag {id}: id already exists")
            }
            Self::Validation(message) => write!(f, "invalid store input: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted tag data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Read/write result envelope: the document plus its current version token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTag {
    pub id: TagId,
    pub tag: Tag,
    pub token: VersionToken,
}

/// Structural constraint evaluated by the store itself, independent of
/// caller-supplied filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFilter {
    /// Match only documents whose body does not carry the named top-level
    /// field.
    FieldAbsent(&'static str),
}

/// Page window for listing. A missing limit resolves to the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationArgs {
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Exact-match filter on one top-level body field. Inactive unless both
/// halves are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteringArgs {
    pub field: Option<String>,
    pub value: Option<String>,
}

impl FilteringArgs {
    /// Filter on `field == value`.
    pub fn on(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            value: Some(value.into()),
        }
    }

    fn active(&self) -> Option<(&str, &str)> {
        match (self.field.as_deref(), self.value.as_deref()) {
            (Some(field), Some(value)) => Some((field, value)),
            _ => None,
        }
    }
}

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Sort key for listings. Without a field, listings come back newest-first
/// by `updated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortingArgs {
    pub field: Option<String>,
    pub order: SortOrder,
}

impl SortingArgs {
    /// Sort on one body field in the given direction.
    pub fn by(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: Some(field.into()),
            order,
        }
    }
}

/// Normalizes list limit according to the tags listing contract.
pub fn normalize_tag_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) => TAGS_DEFAULT_LIMIT,
        Some(value) if value > TAGS_LIMIT_MAX => TAGS_LIMIT_MAX,
        Some(value) => value,
        None => TAGS_DEFAULT_LIMIT,
    }
}

/// Store interface for versioned tag documents.
pub trait TagStore {
    /// Reads one document by id, soft-deleted or not.
    fn read(&self, id: TagId) -> StoreResult<StoredTag>;

    /// Writes the full document body.
    ///
    /// With `expected = None` the write is an insert of a fresh id and fails
    /// with `Conflict` when the id already exists. With `Some(token)` it
    /// replaces the stored body only while the stored token still equals
    /// `token`. Returns the written document with its new token.
    fn write(&self, id: TagId, body: &Tag, expected: Option<VersionToken>)
        -> StoreResult<StoredTag>;

    /// Counts documents matching the structural filter.
    fn count(&self, filter: Option<DocFilter>) -> StoreResult<u64>;

    /// Lists documents under caller filtering/sorting/paging plus the
    /// structural filter.
    fn search(
        &self,
        pagination: &PaginationArgs,
        filtering: &FilteringArgs,
        sorting: &SortingArgs,
        filter: Option<DocFilter>,
    ) -> StoreResult<Vec<StoredTag>>;
}

/// SQLite-backed versioned document store.
pub struct SqliteTagStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTagStore<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_schema_current(conn)?;
        ensure_table_shape(conn, "tags", &["id", "body", "version_term", "version_seq"])?;
        Ok(Self { conn })
    }
}

impl TagStore for SqliteTagStore<'_> {
    fn read(&self, id: TagId) -> StoreResult<StoredTag> {
        let mut stmt = self.conn.prepare(&format!(
            "{TAG_SELECT_SQL}
             WHERE id = ?1;"
        ))?;

        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => parse_tag_row(row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn write(
        &self,
        id: TagId,
        body: &Tag,
        expected: Option<VersionToken>,
    ) -> StoreResult<StoredTag> {
        let encoded = encode_body(id, body)?;

        match expected {
            None => {
                let inserted = self.conn.execute(
                    "INSERT INTO tags (id, body, version_term, version_seq)
                     VALUES (?1, ?2, 1, 1);",
                    params![id.to_string(), encoded],
                );
                if let Err(err) = inserted {
                    if is_unique_violation(&err) {
                        return Err(StoreError::Conflict { id, supplied: None });
                    }
                    return Err(err.into());
                }
            }
            Some(token) => {
                let changed = self.conn.execute(
                    "UPDATE tags
                     SET
                        body = ?1,
                        version_seq = version_seq + 1
                     WHERE id = ?2
                       AND version_term = ?3
                       AND version_seq = ?4;",
                    params![encoded, id.to_string(), token.term(), token.seq()],
                )?;

                if changed == 0 {
                    // Zero rows means either a missing id or a stale token;
                    // probe existence to tell the two apart.
                    return match self.read(id) {
                        Ok(_) => Err(StoreError::Conflict {
                            id,
                            supplied: Some(token),
                        }),
                        Err(StoreError::NotFound(_)) => Err(StoreError::NotFound(id)),
                        Err(other) => Err(other),
                    };
                }
            }
        }

        self.read(id)
    }

    fn count(&self, filter: Option<DocFilter>) -> StoreResult<u64> {
        let mut sql = String::from("SELECT COUNT(*) FROM tags WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        push_doc_filter(&mut sql, &mut bind_values, filter)?;

        let mut stmt = self.conn.prepare(&sql)?;
        let count: i64 = stmt.query_row(params_from_iter(bind_values), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn search(
        &self,
        pagination: &PaginationArgs,
        filtering: &FilteringArgs,
        sorting: &SortingArgs,
        filter: Option<DocFilter>,
    ) -> StoreResult<Vec<StoredTag>> {
        let mut sql = format!("{TAG_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some((field, value)) = filtering.active() {
            sql.push_str(" AND json_extract(body, ?) = ?");
            bind_values.push(Value::Text(field_path(field)?));
            bind_values.push(Value::Text(value.to_string()));
        }

        push_doc_filter(&mut sql, &mut bind_values, filter)?;

        match sorting.field.as_deref() {
            Some(field) => {
                sql.push_str(&format!(
                    " ORDER BY json_extract(body, ?) {}, id ASC",
                    sorting.order.sql()
                ));
                bind_values.push(Value::Text(field_path(field)?));
            }
            None => sql.push_str(" ORDER BY json_extract(body, '$.updated') DESC, id ASC"),
        }

        let limit = normalize_tag_limit(pagination.limit);
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        if pagination.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(pagination.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tags = Vec::new();

        while let Some(row) = rows.next()? {
            tags.push(parse_tag_row(row)?);
        }

        Ok(tags)
    }
}

fn push_doc_filter(
    sql: &mut String,
    bind_values: &mut Vec<Value>,
    filter: Option<DocFilter>,
) -> StoreResult<()> {
    if let Some(DocFilter::FieldAbsent(field)) = filter {
        sql.push_str(" AND json_extract(body, ?) IS NULL");
        bind_values.push(Value::Text(field_path(field)?));
    }
    Ok(())
}

/// Builds a top-level JSON path from a caller-supplied field name.
fn field_path(field: &str) -> StoreResult<String> {
    if !FIELD_NAME_RE.is_match(field) {
        return Err(StoreError::Validation(format!(
            "invalid field name `{field}`: expected [A-Za-z0-9_]+"
        )));
    }
    Ok(format!("$.{field}"))
}

fn encode_body(id: TagId, body: &Tag) -> StoreResult<String> {
    serde_json::to_string(body).map_err(|err| {
        StoreError::Validation(format!("tag body for {id} failed to serialize: {err}"))
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == ErrorCode::ConstraintViolation
    )
}

fn parse_tag_row(row: &Row<'_>) -> StoreResult<StoredTag> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{id_text}` in tags.id"))
    })?;

    let body_text: String = row.get("body")?;
    let tag: Tag = serde_json::from_str(&body_text).map_err(|err| {
        StoreError::InvalidData(format!("invalid body for tag {id} in tags.body: {err}"))
    })?;

    let token = VersionToken::new(row.get("version_term")?, row.get("version_seq")?);

    Ok(StoredTag { id, tag, token })
}
