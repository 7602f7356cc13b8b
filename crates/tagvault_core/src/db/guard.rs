//! Connection readiness guards shared by store constructors.
//!
//! # Responsibility
//! - Verify a connection has been migrated before a store accepts it.
//! - Verify the tables/columns a store depends on actually exist.
//!
//! # Invariants
//! - Guards never mutate the connection; they only inspect schema metadata.

use super::migrations::latest_version;
use super::{DbError, DbResult};
use rusqlite::Connection;
use std::collections::HashSet;

/// Checks that `PRAGMA user_version` matches the latest known migration.
///
/// # Errors
/// - `UninitializedConnection` when the database is behind (or never
///   migrated at all).
/// - `UnsupportedSchemaVersion` when the database is ahead of this binary.
pub fn ensure_schema_current(conn: &Connection) -> DbResult<()> {
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let expected_version = latest_version();

    if actual_version < expected_version {
        return Err(DbError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    if actual_version > expected_version {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: actual_version,
            latest_supported: expected_version,
        });
    }

    Ok(())
}

/// Checks that `table` exists and carries every column in `columns`.
pub fn ensure_table_shape(
    conn: &Connection,
    table: &'static str,
    columns: &[&'static str],
) -> DbResult<()> {
    let table_exists: bool = conn.query_row(
        "SELECT EXISTS (
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Err(DbError::MissingRequiredTable(table));
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1);")?;
    let present: HashSet<String> = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    for column in columns {
        if !present.contains(*column) {
            return Err(DbError::MissingRequiredColumn { table, column });
        }
    }

    Ok(())
}
