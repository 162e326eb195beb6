//! Tribe (group) query functions.

use rusqlite::Connection;
use tribe_types::{GroupId, RowState, UserId};

use crate::{to_sql_int, DbError, Result};

/// Insert a new tribe.
pub fn insert(
    conn: &Connection,
    id: GroupId,
    name: &str,
    created_by: UserId,
    created_at: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO tribes (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, name, created_by, to_sql_int(created_at)?],
    )
    .map_err(|e| DbError::from_write(e, "tribe"))?;
    Ok(())
}

/// Get a tribe that has not been deleted.
pub fn get_active(conn: &Connection, id: GroupId) -> Result<TribeRow> {
    conn.query_row(
        "SELECT id, name, created_by, created_at, deleted_at
         FROM tribes WHERE id = ?1 AND deleted_at IS NULL",
        [id],
        |row| {
            Ok(TribeRow {
                id: row.get(0)?,
                name: row.get(1)?,
                created_by: row.get(2)?,
                created_at: row.get::<_, i64>(3)? as u64,
                state: RowState::from_deleted_at(row.get::<_, Option<i64>>(4)?.map(|t| t as u64)),
            })
        },
    )
    .map_err(|e| DbError::from_lookup(e, "tribe"))
}

/// Tombstone a tribe. Its shares and ownerships are left to the sharing
/// layer.
pub fn soft_delete(conn: &Connection, id: GroupId, now: u64) -> Result<()> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE tribes SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        rusqlite::params![now, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound("tribe".into()));
    }
    Ok(())
}

/// A raw tribe row from the database.
#[derive(Debug)]
pub struct TribeRow {
    pub id: GroupId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: u64,
    pub state: RowState,
}
