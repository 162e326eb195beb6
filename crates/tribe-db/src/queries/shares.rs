//! Share query functions.
//!
//! The store enforces at most one active row per (resource, group) through
//! a partial unique index. Transitions bump `version` in the same statement
//! that changes the row.

use rusqlite::{named_params, Connection, OptionalExtension, Row};
use tribe_types::{GroupId, Resource, ResourceId, RowState, Share, ShareId, UserId};

use crate::queries::resources;
use crate::{to_sql_int, DbError, Result};

/// SQL twin of [`Share::is_visible`] for shares aliased `s`. Binds `:now`.
pub const VISIBLE: &str = "s.deleted_at IS NULL AND (s.expires_at IS NULL OR s.expires_at > :now)";

/// Active but no longer visible: what the sweeper cleans. Binds `:now`.
pub const EXPIRED: &str =
    "s.deleted_at IS NULL AND s.expires_at IS NOT NULL AND s.expires_at <= :now";

const COLUMNS: &str = "s.id, s.resource_id, s.group_id, s.granted_by, s.expires_at, s.version,
     s.created_at, s.updated_at, s.deleted_at";

const RETURNING: &str = "RETURNING id, resource_id, group_id, granted_by, expires_at, version,
     created_at, updated_at, deleted_at";

const COLUMN_COUNT: usize = 9;

fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Share> {
    Ok(Share {
        id: row.get(offset)?,
        resource_id: row.get(offset + 1)?,
        group_id: row.get(offset + 2)?,
        granted_by: row.get(offset + 3)?,
        expires_at: row.get::<_, Option<i64>>(offset + 4)?.map(|t| t as u64),
        version: row.get::<_, i64>(offset + 5)? as u64,
        created_at: row.get::<_, i64>(offset + 6)? as u64,
        updated_at: row.get::<_, i64>(offset + 7)? as u64,
        state: RowState::from_deleted_at(
            row.get::<_, Option<i64>>(offset + 8)?.map(|t| t as u64),
        ),
    })
}

/// A visible share with the names of the things it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareListing {
    pub share: Share,
    pub resource_name: String,
    pub group_name: String,
    pub granted_by_name: String,
}

/// A resource visible to a group, with the share that makes it visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedResource {
    pub resource: Resource,
    pub share: Share,
}

/// The active row for a pair, expired or not.
pub fn find_active(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
) -> Result<Option<Share>> {
    let share = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM shares s
                 WHERE s.resource_id = ?1 AND s.group_id = ?2 AND s.deleted_at IS NULL"
            ),
            rusqlite::params![resource, group],
            |row| from_row(row, 0),
        )
        .optional()?;
    Ok(share)
}

/// Get a share by id regardless of its state.
pub fn get(conn: &Connection, id: ShareId) -> Result<Share> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM shares s WHERE s.id = ?1"),
        [id],
        |row| from_row(row, 0),
    )
    .map_err(|e| DbError::from_lookup(e, "share"))
}

/// Insert a new share row.
///
/// Fails with `Duplicate` if the pair already has an active row.
pub fn insert(conn: &Connection, share: &Share) -> Result<()> {
    conn.execute(
        "INSERT INTO shares
         (id, resource_id, group_id, granted_by, expires_at, version,
          created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            share.id,
            share.resource_id,
            share.group_id,
            share.granted_by,
            share.expires_at.map(to_sql_int).transpose()?,
            to_sql_int(share.version)?,
            to_sql_int(share.created_at)?,
            to_sql_int(share.updated_at)?,
            share.state.deleted_at().map(to_sql_int).transpose()?,
        ],
    )
    .map_err(|e| DbError::from_write(e, "active share"))?;
    Ok(())
}

/// Re-grant an active share in place, bumping its version.
pub fn update_active(
    conn: &Connection,
    id: ShareId,
    granted_by: UserId,
    expires_at: Option<u64>,
    now: u64,
) -> Result<Share> {
    let expires_at = expires_at.map(to_sql_int).transpose()?;
    let now = to_sql_int(now)?;
    conn.query_row(
        &format!(
            "UPDATE shares
             SET granted_by = ?1, expires_at = ?2, updated_at = ?3, version = version + 1
             WHERE id = ?4 AND deleted_at IS NULL
             {RETURNING}"
        ),
        rusqlite::params![granted_by, expires_at, now, id],
        |row| from_row(row, 0),
    )
    .map_err(|e| DbError::from_lookup(e, "active share"))
}

/// Tombstone an active share, bumping its version.
pub fn soft_delete(conn: &Connection, id: ShareId, now: u64) -> Result<Share> {
    let now = to_sql_int(now)?;
    conn.query_row(
        &format!(
            "UPDATE shares
             SET deleted_at = ?1, updated_at = ?1, version = version + 1
             WHERE id = ?2 AND deleted_at IS NULL
             {RETURNING}"
        ),
        rusqlite::params![now, id],
        |row| from_row(row, 0),
    )
    .map_err(|e| DbError::from_lookup(e, "active share"))
}

/// Tombstone every active share of a resource. Returns the number of rows.
pub fn soft_delete_for_resource(
    conn: &Connection,
    resource: ResourceId,
    now: u64,
) -> Result<usize> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE shares
         SET deleted_at = ?1, updated_at = ?1, version = version + 1
         WHERE resource_id = ?2 AND deleted_at IS NULL",
        rusqlite::params![now, resource],
    )?;
    Ok(updated)
}

/// Tombstone every active share to a group, bumping versions. Returns the
/// tombstoned rows.
pub fn soft_delete_for_group(conn: &Connection, group: GroupId, now: u64) -> Result<Vec<Share>> {
    let now = to_sql_int(now)?;
    let mut stmt = conn.prepare(&format!(
        "UPDATE shares
         SET deleted_at = ?1, updated_at = ?1, version = version + 1
         WHERE group_id = ?2 AND deleted_at IS NULL
         {RETURNING}"
    ))?;

    let rows = stmt
        .query_map(rusqlite::params![now, group], |row| from_row(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Visible shares of a live resource, newest first.
pub fn list_visible_for_resource(
    conn: &Connection,
    resource: ResourceId,
    now: u64,
) -> Result<Vec<ShareListing>> {
    let now = to_sql_int(now)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS}, r.name, t.name, u.display_name
         FROM shares s
         JOIN resources r ON r.id = s.resource_id
         JOIN tribes t ON t.id = s.group_id
         JOIN users u ON u.id = s.granted_by
         WHERE s.resource_id = :resource
           AND r.deleted_at IS NULL AND t.deleted_at IS NULL
           AND {VISIBLE}
         ORDER BY s.created_at DESC, s.rowid DESC"
    ))?;

    let rows = stmt
        .query_map(
            named_params! { ":resource": resource, ":now": now },
            |row| {
                Ok(ShareListing {
                    share: from_row(row, 0)?,
                    resource_name: row.get(COLUMN_COUNT)?,
                    group_name: row.get(COLUMN_COUNT + 1)?,
                    granted_by_name: row.get(COLUMN_COUNT + 2)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Live resources visible to a group, newest share first.
pub fn list_visible_for_group(
    conn: &Connection,
    group: GroupId,
    now: u64,
) -> Result<Vec<SharedResource>> {
    let now = to_sql_int(now)?;
    let resource_columns = resources::COLUMNS;
    let mut stmt = conn.prepare(&format!(
        "SELECT {resource_columns}, {COLUMNS}
         FROM shares s
         JOIN resources r ON r.id = s.resource_id
         WHERE s.group_id = :group
           AND r.deleted_at IS NULL
           AND {VISIBLE}
         ORDER BY s.created_at DESC, s.rowid DESC"
    ))?;

    let rows = stmt
        .query_map(named_params! { ":group": group, ":now": now }, |row| {
            Ok(SharedResource {
                resource: resources::from_row(row, 0)?,
                share: from_row(row, resources::COLUMN_COUNT)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Whether the pair currently has a visible share.
pub fn is_visible(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
    now: u64,
) -> Result<bool> {
    let now = to_sql_int(now)?;
    let visible = conn.query_row(
        &format!(
            "SELECT EXISTS (
                 SELECT 1 FROM shares s
                 WHERE s.resource_id = :resource AND s.group_id = :group AND {VISIBLE}
             )"
        ),
        named_params! { ":resource": resource, ":group": group, ":now": now },
        |row| row.get(0),
    )?;
    Ok(visible)
}

/// Number of visible shares of a resource across all groups.
pub fn count_visible_for_resource(
    conn: &Connection,
    resource: ResourceId,
    now: u64,
) -> Result<u64> {
    let now = to_sql_int(now)?;
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM shares s WHERE s.resource_id = :resource AND {VISIBLE}"),
        named_params! { ":resource": resource, ":now": now },
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Active shares past their expiry, oldest expiry first.
pub fn list_expired_active(conn: &Connection, now: u64) -> Result<Vec<Share>> {
    let now = to_sql_int(now)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM shares s WHERE {EXPIRED} ORDER BY s.expires_at ASC, s.rowid ASC"
    ))?;

    let rows = stmt
        .query_map(named_params! { ":now": now }, |row| from_row(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
