//! Owner query functions.
//!
//! There is exactly one row per (resource, principal). Removal tombstones
//! it and every upsert reactivates it, so ownership history never produces
//! duplicate rows. Each upsert is a single `INSERT .. ON CONFLICT` write.

use rusqlite::{Connection, OptionalExtension, Row};
use tribe_types::{GroupId, Owner, Principal, PrincipalKind, ResourceId, RowState};

use crate::{to_sql_int, DbError, Result};

const COLUMNS: &str = "resource_id, principal_id, principal_kind, origin, created_at, deleted_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Owner> {
    let kind: PrincipalKind = row.get(2)?;
    let principal = match kind {
        PrincipalKind::User => Principal::User(row.get(1)?),
        PrincipalKind::Group => Principal::Group(row.get(1)?),
    };
    Ok(Owner {
        resource_id: row.get(0)?,
        principal,
        origin: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
        state: RowState::from_deleted_at(row.get::<_, Option<i64>>(5)?.map(|t| t as u64)),
    })
}

/// Make `principal` a direct owner, inserting or reactivating its row.
///
/// An active share-derived row is promoted to direct.
pub fn upsert_direct(
    conn: &Connection,
    resource: ResourceId,
    principal: Principal,
    now: u64,
) -> Result<Owner> {
    let now = to_sql_int(now)?;
    let principal_id = principal.id();
    conn.query_row(
        &format!(
            "INSERT INTO owners
             (resource_id, principal_id, principal_kind, origin, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'direct', ?4, ?4)
             ON CONFLICT (resource_id, principal_id, principal_kind) DO UPDATE SET
                 origin = 'direct',
                 created_at = CASE WHEN owners.deleted_at IS NULL
                                   THEN owners.created_at ELSE excluded.created_at END,
                 updated_at = excluded.updated_at,
                 deleted_at = NULL
             RETURNING {COLUMNS}"
        ),
        rusqlite::params![
            resource,
            principal_id.as_bytes().as_slice(),
            principal.kind(),
            now,
        ],
        from_row,
    )
    .map_err(|e| DbError::from_write(e, "owner"))
}

/// Ensure `group` owns `resource` because of a share.
///
/// Inserts or reactivates a share-derived row; an already active row keeps
/// its origin, so a direct owner is never downgraded.
pub fn upsert_from_share(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
    now: u64,
) -> Result<Owner> {
    let now = to_sql_int(now)?;
    conn.query_row(
        &format!(
            "INSERT INTO owners
             (resource_id, principal_id, principal_kind, origin, created_at, updated_at)
             VALUES (?1, ?2, 'group', 'share', ?3, ?3)
             ON CONFLICT (resource_id, principal_id, principal_kind) DO UPDATE SET
                 origin = CASE WHEN owners.deleted_at IS NULL
                               THEN owners.origin ELSE 'share' END,
                 created_at = CASE WHEN owners.deleted_at IS NULL
                                   THEN owners.created_at ELSE excluded.created_at END,
                 updated_at = CASE WHEN owners.deleted_at IS NULL
                                   THEN owners.updated_at ELSE excluded.updated_at END,
                 deleted_at = NULL
             RETURNING {COLUMNS}"
        ),
        rusqlite::params![resource, group, now],
        from_row,
    )
    .map_err(|e| DbError::from_write(e, "owner"))
}

/// Look up the owner row for a pair, active or not.
pub fn find(
    conn: &Connection,
    resource: ResourceId,
    principal: Principal,
) -> Result<Option<Owner>> {
    let principal_id = principal.id();
    let owner = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM owners
                 WHERE resource_id = ?1 AND principal_id = ?2 AND principal_kind = ?3"
            ),
            rusqlite::params![resource, principal_id.as_bytes().as_slice(), principal.kind()],
            from_row,
        )
        .optional()?;
    Ok(owner)
}

/// Tombstone an active owner row. Returns whether a row changed.
pub fn soft_delete(
    conn: &Connection,
    resource: ResourceId,
    principal: Principal,
    now: u64,
) -> Result<bool> {
    let now = to_sql_int(now)?;
    let principal_id = principal.id();
    let updated = conn.execute(
        "UPDATE owners SET deleted_at = ?1, updated_at = ?1
         WHERE resource_id = ?2 AND principal_id = ?3 AND principal_kind = ?4
           AND deleted_at IS NULL",
        rusqlite::params![
            now,
            resource,
            principal_id.as_bytes().as_slice(),
            principal.kind(),
        ],
    )?;
    Ok(updated > 0)
}

/// Tombstone a share-derived group owner once no active share justifies
/// it any more. Direct owners are never touched.
pub fn demote_share_derived(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
    now: u64,
) -> Result<bool> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE owners SET deleted_at = ?1, updated_at = ?1
         WHERE resource_id = ?2 AND principal_id = ?3 AND principal_kind = 'group'
           AND origin = 'share' AND deleted_at IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM shares
               WHERE shares.resource_id = ?2 AND shares.group_id = ?3
                 AND shares.deleted_at IS NULL
           )",
        rusqlite::params![now, resource, group],
    )?;
    Ok(updated > 0)
}

/// Turn an active direct group owner into a share-derived one.
pub fn mark_share_derived(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
    now: u64,
) -> Result<bool> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE owners SET origin = 'share', updated_at = ?1
         WHERE resource_id = ?2 AND principal_id = ?3 AND principal_kind = 'group'
           AND origin = 'direct' AND deleted_at IS NULL",
        rusqlite::params![now, resource, group],
    )?;
    Ok(updated > 0)
}

/// List active owners of a resource, oldest first.
pub fn list_active(conn: &Connection, resource: ResourceId) -> Result<Vec<Owner>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM owners
         WHERE resource_id = ?1 AND deleted_at IS NULL
         ORDER BY created_at ASC, rowid ASC"
    ))?;

    let rows = stmt
        .query_map([resource], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Tombstone every active owner of a resource.
pub fn soft_delete_for_resource(
    conn: &Connection,
    resource: ResourceId,
    now: u64,
) -> Result<usize> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE owners SET deleted_at = ?1, updated_at = ?1
         WHERE resource_id = ?2 AND deleted_at IS NULL",
        rusqlite::params![now, resource],
    )?;
    Ok(updated)
}

/// Tombstone every active ownership held by a group, whatever its origin.
pub fn soft_delete_for_group(conn: &Connection, group: GroupId, now: u64) -> Result<usize> {
    let now = to_sql_int(now)?;
    let updated = conn.execute(
        "UPDATE owners SET deleted_at = ?1, updated_at = ?1
         WHERE principal_id = ?2 AND principal_kind = 'group' AND deleted_at IS NULL",
        rusqlite::params![now, group],
    )?;
    Ok(updated)
}
