//! Share, unshare and share listings.

use std::sync::Arc;

use tracing::{debug, info};
use tribe_db::queries::shares::{self, ShareListing, SharedResource};
use tribe_db::queries::{resources, tribes, users};
use tribe_db::{Context, Database};
use tribe_types::{
    GroupId, ResourceId, RowState, Share, ShareId, Timestamp, UserId, MAX_TIMESTAMP,
};

use crate::clock::{Clock, SystemClock};
use crate::config::SharingConfig;
use crate::{ownership, require_id, Result, SharingError};

/// Entry point for every sharing operation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SharingService {
    pub(crate) db: Database,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SharingConfig,
}

fn check_expiry(expires_at: Option<Timestamp>, now: Timestamp) -> Result<()> {
    match expires_at {
        Some(at) if at <= now => Err(SharingError::InvalidInput(format!(
            "expiry {at} is not in the future (now {now})"
        ))),
        Some(at) if at > MAX_TIMESTAMP => Err(SharingError::InvalidInput(format!(
            "expiry {at} is past the largest storable time {MAX_TIMESTAMP}"
        ))),
        _ => Ok(()),
    }
}

impl SharingService {
    pub fn new(db: Database, config: SharingConfig) -> Self {
        Self::with_clock(db, config, SystemClock)
    }

    pub fn with_clock(db: Database, config: SharingConfig, clock: impl Clock) -> Self {
        Self {
            db,
            clock: Arc::new(clock),
            config,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &SharingConfig {
        &self.config
    }

    /// Share `resource` with `group`, or re-grant an existing share.
    ///
    /// Converges on exactly one active share for the pair: a new row starts
    /// at version 1, an existing active row is updated in place with its
    /// version bumped by one. The group becomes an owner of the resource.
    ///
    /// Requires serializable isolation so two concurrent first shares
    /// cannot both insert.
    pub async fn share(
        &self,
        ctx: &Context,
        resource: ResourceId,
        group: GroupId,
        granted_by: UserId,
        expires_at: Option<Timestamp>,
    ) -> Result<Share> {
        require_id(resource.is_nil(), "resource")?;
        require_id(group.is_nil(), "group")?;
        require_id(granted_by.is_nil(), "user")?;
        check_expiry(expires_at, self.clock.now())?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let share = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Share> {
                let now = clock.now();
                check_expiry(expires_at, now)?;
                resources::get_active(tx, resource)?;
                tribes::get_active(tx, group)?;
                users::get_active(tx, granted_by)?;

                let share = match shares::find_active(tx, resource, group)? {
                    Some(current) => {
                        shares::update_active(tx, current.id, granted_by, expires_at, now)?
                    }
                    None => {
                        let share = Share {
                            id: ShareId::random(),
                            resource_id: resource,
                            group_id: group,
                            granted_by,
                            expires_at,
                            version: 1,
                            created_at: now,
                            updated_at: now,
                            state: RowState::Active,
                        };
                        shares::insert(tx, &share)?;
                        share
                    }
                };
                ownership::promote(tx, resource, group, now)?;
                Ok(share)
            })
            .await
            .map_err(|e| e.in_op("share"))?;

        info!(
            %resource,
            %group,
            version = share.version,
            expires_at = ?share.expires_at,
            "resource shared"
        );
        Ok(share)
    }

    /// Remove the active share for the pair, if any.
    ///
    /// Idempotent: with no active share there is nothing to do and the call
    /// succeeds. Otherwise the share is tombstoned with its version bumped
    /// and a share-derived group owner is demoted.
    pub async fn unshare(&self, ctx: &Context, resource: ResourceId, group: GroupId) -> Result<()> {
        require_id(resource.is_nil(), "resource")?;
        require_id(group.is_nil(), "group")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let removed = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Option<Share>> {
                let now = clock.now();
                let Some(active) = shares::find_active(tx, resource, group)? else {
                    return Ok(None);
                };
                let removed = shares::soft_delete(tx, active.id, now)?;
                ownership::demote(tx, resource, group, now)?;
                Ok(Some(removed))
            })
            .await
            .map_err(|e| e.in_op("unshare"))?;

        match removed {
            Some(share) => info!(%resource, %group, version = share.version, "resource unshared"),
            None => debug!(%resource, %group, "unshare: no active share"),
        }
        Ok(())
    }

    /// Visible shares of a resource, newest first.
    pub async fn list_shares(
        &self,
        ctx: &Context,
        resource: ResourceId,
    ) -> Result<Vec<ShareListing>> {
        require_id(resource.is_nil(), "resource")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.read_options();
        self.db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Vec<ShareListing>> {
                resources::get_active(tx, resource)?;
                Ok(shares::list_visible_for_resource(tx, resource, clock.now())?)
            })
            .await
            .map_err(|e| e.in_op("list shares"))
    }

    /// Resources visible to a group, newest share first.
    pub async fn list_shared_with(
        &self,
        ctx: &Context,
        group: GroupId,
    ) -> Result<Vec<SharedResource>> {
        require_id(group.is_nil(), "group")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.read_options();
        self.db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<Vec<SharedResource>> {
                tribes::get_active(tx, group)?;
                Ok(shares::list_visible_for_group(tx, group, clock.now())?)
            })
            .await
            .map_err(|e| e.in_op("list shared with"))
    }

    /// Whether the pair currently has a visible share.
    pub async fn is_shared_with(
        &self,
        ctx: &Context,
        resource: ResourceId,
        group: GroupId,
    ) -> Result<bool> {
        require_id(resource.is_nil(), "resource")?;
        require_id(group.is_nil(), "group")?;

        let clock = Arc::clone(&self.clock);
        let opts = self.config.read_options();
        self.db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<bool> {
                Ok(shares::is_visible(tx, resource, group, clock.now())?)
            })
            .await
            .map_err(|e| e.in_op("is shared with"))
    }
}
