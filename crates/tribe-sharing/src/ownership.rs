//! Resource ownership and the owner side effects of sharing.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};
use tribe_db::queries::{owners, resources, shares, tribes, users};
use tribe_db::Context;
use tribe_types::{
    GroupId, Owner, Principal, Resource, ResourceId, ResourceKind, RowState, Timestamp, UserId,
    Visibility,
};

use crate::{require_id, Result, SharingError, SharingService};

/// Input for [`SharingService::create_resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub kind: ResourceKind,
    pub name: String,
    pub description: Option<String>,
    /// `Private` or `Public`; `Shared` is only reached by sharing.
    pub visibility: Visibility,
    pub created_by: UserId,
    /// Primary owner, recorded as a direct owner.
    pub owner: Principal,
}

impl NewResource {
    /// A private resource owned by its creator.
    pub fn private(kind: ResourceKind, name: impl Into<String>, created_by: UserId) -> Self {
        Self {
            kind,
            name: name.into(),
            description: None,
            visibility: Visibility::Private,
            created_by,
            owner: Principal::User(created_by),
        }
    }

    fn validate(&self) -> Result<()> {
        require_id(self.created_by.is_nil(), "creator")?;
        require_id(self.owner.is_nil(), "owner")?;
        if self.name.trim().is_empty() {
            return Err(SharingError::InvalidInput("resource name is empty".into()));
        }
        if self.visibility == Visibility::Shared {
            return Err(SharingError::InvalidInput(
                "a resource cannot be created as shared".into(),
            ));
        }
        Ok(())
    }
}

/// Rows tombstoned by [`SharingService::delete_resource`] and
/// [`SharingService::delete_tribe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub shares: usize,
    pub owners: usize,
}

fn require_principal(conn: &Connection, principal: Principal) -> Result<()> {
    match principal {
        Principal::User(id) => users::get_active(conn, id).map(drop)?,
        Principal::Group(id) => tribes::get_active(conn, id).map(drop)?,
    }
    Ok(())
}

/// Make `group` an owner because it now has an active share.
pub(crate) fn promote(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
    now: Timestamp,
) -> Result<Owner> {
    let owner = owners::upsert_from_share(conn, resource, group, now)?;
    let (from, to) = (Visibility::Private, Visibility::Shared);
    if resources::transition_visibility(conn, resource, from, to, now)? {
        debug!(%resource, "resource now shared");
    }
    Ok(owner)
}

/// Undo [`promote`] after the active share for the pair went away.
///
/// A direct owner keeps its row. The resource falls back to private once
/// nothing is shared any more.
pub(crate) fn demote(
    conn: &Connection,
    resource: ResourceId,
    group: GroupId,
    now: Timestamp,
) -> Result<()> {
    if owners::demote_share_derived(conn, resource, group, now)? {
        debug!(%resource, %group, "share-derived owner removed");
    }
    let (from, to) = (Visibility::Shared, Visibility::Private);
    if shares::count_visible_for_resource(conn, resource, now)? == 0
        && resources::transition_visibility(conn, resource, from, to, now)?
    {
        debug!(%resource, "resource back to private");
    }
    Ok(())
}

impl SharingService {
    /// Create a resource together with its primary direct owner.
    pub async fn create_resource(&self, ctx: &Context, new: NewResource) -> Result<Resource> {
        new.validate()?;

        let clock = Arc::clone(&self.clock);
        let id = ResourceId::random();
        let opts = self.config.write_options();
        let resource = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Resource> {
                let now = clock.now();
                users::get_active(tx, new.created_by)?;
                require_principal(tx, new.owner)?;

                let resource = Resource {
                    id,
                    kind: new.kind,
                    name: new.name.clone(),
                    description: new.description.clone(),
                    visibility: new.visibility,
                    created_by: new.created_by,
                    created_at: now,
                    updated_at: now,
                    state: RowState::Active,
                };
                resources::insert(tx, &resource)?;
                owners::upsert_direct(tx, id, new.owner, now)?;
                Ok(resource)
            })
            .await
            .map_err(|e| e.in_op("create resource"))?;

        info!(resource = %resource.id, kind = resource.kind.as_str(), "resource created");
        Ok(resource)
    }

    /// Make `principal` a direct owner. Re-adding reactivates the old row.
    pub async fn add_owner(
        &self,
        ctx: &Context,
        resource: ResourceId,
        principal: Principal,
    ) -> Result<Owner> {
        require_id(resource.is_nil(), "resource")?;
        require_id(principal.is_nil(), "owner")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let owner = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Owner> {
                let now = clock.now();
                resources::get_active(tx, resource)?;
                require_principal(tx, principal)?;
                Ok(owners::upsert_direct(tx, resource, principal, now)?)
            })
            .await
            .map_err(|e| e.in_op("add owner"))?;

        info!(%resource, ?principal, "owner added");
        Ok(owner)
    }

    /// Drop `principal`'s direct ownership.
    ///
    /// A group that still has an active share stays on as a share-derived
    /// owner. Returns whether anything changed.
    pub async fn remove_owner(
        &self,
        ctx: &Context,
        resource: ResourceId,
        principal: Principal,
    ) -> Result<bool> {
        require_id(resource.is_nil(), "resource")?;
        require_id(principal.is_nil(), "owner")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let changed = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<bool> {
                let now = clock.now();
                resources::get_active(tx, resource)?;
                if let Principal::Group(group) = principal {
                    if shares::find_active(tx, resource, group)?.is_some() {
                        return Ok(owners::mark_share_derived(tx, resource, group, now)?);
                    }
                }
                Ok(owners::soft_delete(tx, resource, principal, now)?)
            })
            .await
            .map_err(|e| e.in_op("remove owner"))?;

        if changed {
            info!(%resource, ?principal, "owner removed");
        }
        Ok(changed)
    }

    /// Active owners of a resource, oldest first.
    pub async fn list_owners(&self, ctx: &Context, resource: ResourceId) -> Result<Vec<Owner>> {
        require_id(resource.is_nil(), "resource")?;

        let opts = self.config.read_options();
        self.db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Vec<Owner>> {
                resources::get_active(tx, resource)?;
                Ok(owners::list_active(tx, resource)?)
            })
            .await
            .map_err(|e| e.in_op("list owners"))
    }

    /// Delete a resource with all of its owners and active shares.
    pub async fn delete_resource(
        &self,
        ctx: &Context,
        resource: ResourceId,
    ) -> Result<DeleteSummary> {
        require_id(resource.is_nil(), "resource")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let summary = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<DeleteSummary> {
                let now = clock.now();
                resources::soft_delete(tx, resource, now)?;
                Ok(DeleteSummary {
                    shares: shares::soft_delete_for_resource(tx, resource, now)?,
                    owners: owners::soft_delete_for_resource(tx, resource, now)?,
                })
            })
            .await
            .map_err(|e| e.in_op("delete resource"))?;

        info!(%resource, shares = summary.shares, owners = summary.owners, "resource deleted");
        Ok(summary)
    }

    /// Delete a tribe, revoking every active share to it and every
    /// ownership it holds. Resources left without a visible share fall
    /// back to private.
    pub async fn delete_tribe(&self, ctx: &Context, group: GroupId) -> Result<DeleteSummary> {
        require_id(group.is_nil(), "tribe")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let summary = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<DeleteSummary> {
                let now = clock.now();
                tribes::soft_delete(tx, group, now)?;
                let revoked = shares::soft_delete_for_group(tx, group, now)?;
                let owners = owners::soft_delete_for_group(tx, group, now)?;
                for share in &revoked {
                    demote(tx, share.resource_id, group, now)?;
                }
                Ok(DeleteSummary {
                    shares: revoked.len(),
                    owners,
                })
            })
            .await
            .map_err(|e| e.in_op("delete tribe"))?;

        info!(%group, shares = summary.shares, owners = summary.owners, "tribe deleted");
        Ok(summary)
    }
}
