//! Resource query functions.

use rusqlite::{Connection, Row};
use tribe_types::{Resource, ResourceId, RowState, Visibility};

use crate::{to_sql_int, DbError, Result};

/// Column list matching [`from_row`], for tables aliased as `r`.
pub const COLUMNS: &str = "r.id, r.kind, r.name, r.description, r.visibility, r.created_by,
     r.created_at, r.updated_at, r.deleted_at";

/// Number of columns in [`COLUMNS`].
pub const COLUMN_COUNT: usize = 9;

/// Map a row selected with [`COLUMNS`] starting at `offset`.
pub fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(offset)?,
        kind: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        description: row.get(offset + 3)?,
        visibility: row.get(offset + 4)?,
        created_by: row.get(offset + 5)?,
        created_at: row.get::<_, i64>(offset + 6)? as u64,
        updated_at: row.get::<_, i64>(offset + 7)? as u64,
        state: RowState::from_deleted_at(
            row.get::<_, Option<i64>>(offset + 8)?.map(|t| t as u64),
        ),
    })
}

/// Insert a new resource.
pub fn insert(conn: &Connection, resource: &Resource) -> Result<()> {
    conn.execute(
        "INSERT INTO resources
         (id, kind, name, description, visibility, created_by, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            resource.id,
            resource.kind,
            resource.name,
            resource.description,
            resource.visibility,
            resource.created_by,
            to_sql_int(resource.created_at)?,
            to_sql_int(resource.updated_at)?,
            resource.state.deleted_at().map(to_sql_int).transpose()?,
        ],
    )
    .map_err(|e| DbError::from_write(e, "resource"))?;
    Ok(())
}

/// Get a resource regardless of its state.
pub fn get(conn: &Connection, id: ResourceId) -> Result<Resource> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM resources r WHERE r.id = ?1"),
        [id],
        |row| from_row(row, 0),
    )
    .map_err(|e| DbError::from_lookup(e, "resource"))
}

/// Get a resource that has not been deleted.
pub fn get_active(conn: &Connection, id: ResourceId) -> Result<Resource> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM resources r WHERE r.id = ?1 AND r.deleted_at IS NULL"),
        [id],
        |row| from_row(row, 0),
    )
    .map_err(|e| DbError::from_lookup(e, "resource"))
}

/// Tombstone a resource. Dependent owners and shares are handled by the
/// caller in the same transaction.
pub fn soft_delete(conn: &Connection, id: ResourceId, now: u64) -> Result<()> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE resources SET deleted_at = ?1, updated_at = ?1
         WHERE id = ?2 AND deleted_at IS NULL",
        rusqlite::params![now, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound("resource".into()));
    }
    Ok(())
}

/// Move an active resource from `from` to `to` visibility.
///
/// Returns whether the row changed; a resource in any other visibility is
/// left alone.
pub fn transition_visibility(
    conn: &Connection,
    id: ResourceId,
    from: Visibility,
    to: Visibility,
    now: u64,
) -> Result<bool> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE resources SET visibility = ?1, updated_at = ?2
         WHERE id = ?3 AND visibility = ?4 AND deleted_at IS NULL",
        rusqlite::params![to, now, id, from],
    )?;
    Ok(updated > 0)
}
