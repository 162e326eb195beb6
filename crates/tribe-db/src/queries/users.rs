//! User query functions.

use rusqlite::Connection;
use tribe_types::{RowState, UserId};

use crate::{to_sql_int, DbError, Result};

/// Insert a new user.
pub fn insert(conn: &Connection, id: UserId, display_name: &str, created_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, display_name, to_sql_int(created_at)?],
    )
    .map_err(|e| DbError::from_write(e, "user"))?;
    Ok(())
}

/// Get a user that has not been deleted.
pub fn get_active(conn: &Connection, id: UserId) -> Result<UserRow> {
    conn.query_row(
        "SELECT id, display_name, created_at, deleted_at
         FROM users WHERE id = ?1 AND deleted_at IS NULL",
        [id],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                created_at: row.get::<_, i64>(2)? as u64,
                state: RowState::from_deleted_at(row.get::<_, Option<i64>>(3)?.map(|t| t as u64)),
            })
        },
    )
    .map_err(|e| DbError::from_lookup(e, "user"))
}

/// A raw user row from the database.
#[derive(Debug)]
pub struct UserRow {
    pub id: UserId,
    pub display_name: String,
    pub created_at: u64,
    pub state: RowState,
}
