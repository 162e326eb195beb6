//! Fixtures for exercising the sharing service against a real database.

use rusqlite::OptionalExtension;
use tempfile::TempDir;
use tribe_db::queries::{resources, shares, tribes, users};
use tribe_db::{Context, Database, DbConfig, DbError, TxOptions};
use tribe_types::{GroupId, ResourceId, ResourceKind, Share, ShareId, UserId, Visibility};

use crate::clock::{Clock, ManualClock};
use crate::{NewResource, Result, SharingConfig, SharingService};

/// Start time of every [`TestEnv`] clock.
pub const NOW: u64 = 1_700_000_000;

/// On-disk database in a temporary directory, a manual clock and a service
/// wired to both.
///
/// Pre-populated with one user ("Alice"), one tribe she created
/// ("Climbers") and one private list she owns ("Groceries").
#[derive(Debug)]
pub struct TestEnv {
    _dir: TempDir,
    pub db: Database,
    pub clock: ManualClock,
    pub service: SharingService,
    pub user: UserId,
    pub tribe: GroupId,
    pub list: ResourceId,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(SharingConfig::default(), DbConfig::default()).await
    }

    pub async fn with_config(config: SharingConfig, db_config: DbConfig) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Database::open(dir.path().join("tribe.db"), db_config).expect("open database");
        let clock = ManualClock::new(NOW);
        let service = SharingService::with_clock(db.clone(), config, clock.clone());

        let mut env = Self {
            _dir: dir,
            db,
            clock,
            service,
            user: UserId::nil(),
            tribe: GroupId::nil(),
            list: ResourceId::nil(),
        };
        env.user = env.add_user("Alice").await.expect("seed user");
        env.tribe = env.add_tribe("Climbers", env.user).await.expect("seed tribe");
        env.list = env.add_list(env.user, "Groceries").await.expect("seed list");
        env
    }

    pub async fn add_user(&self, name: &str) -> Result<UserId> {
        let id = UserId::random();
        let name = name.to_string();
        let now = self.clock.now();
        let opts = TxOptions::serializable();
        self.db
            .run_in_transaction(&Context::background(), &opts, move |tx| -> Result<()> {
                users::insert(tx, id, &name, now)?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    pub async fn add_tribe(&self, name: &str, created_by: UserId) -> Result<GroupId> {
        let id = GroupId::random();
        let name = name.to_string();
        let now = self.clock.now();
        let opts = TxOptions::serializable();
        self.db
            .run_in_transaction(&Context::background(), &opts, move |tx| -> Result<()> {
                tribes::insert(tx, id, &name, created_by, now)?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    /// A private list owned directly by `owner`.
    pub async fn add_list(&self, owner: UserId, name: &str) -> Result<ResourceId> {
        let resource = self
            .service
            .create_resource(
                &Context::background(),
                NewResource::private(ResourceKind::List, name, owner),
            )
            .await?;
        Ok(resource.id)
    }

    /// The active share row for a pair, visible or not.
    pub async fn active_share(&self, resource: ResourceId, group: GroupId) -> Option<Share> {
        self.read(move |tx| Ok(shares::find_active(tx, resource, group)?))
            .await
    }

    pub async fn share_by_id(&self, id: ShareId) -> Share {
        self.read(move |tx| Ok(shares::get(tx, id)?)).await
    }

    /// Number of share rows for a pair, tombstones included.
    pub async fn share_rows(&self, resource: ResourceId, group: GroupId) -> usize {
        self.read(move |tx| {
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM shares WHERE resource_id = ?1 AND group_id = ?2",
                rusqlite::params![resource, group],
                |row| row.get(0),
            )
            .map_err(DbError::from)?;
            Ok(count as usize)
        })
        .await
    }

    /// Whether the pair has a share row of the given version, in any state.
    pub async fn has_share_version(
        &self,
        resource: ResourceId,
        group: GroupId,
        version: u64,
    ) -> bool {
        self.read(move |tx| {
            let found = tx
                .query_row(
                    "SELECT 1 FROM shares
                     WHERE resource_id = ?1 AND group_id = ?2 AND version = ?3",
                    rusqlite::params![resource, group, version as i64],
                    |_| Ok(()),
                )
                .optional()
                .map_err(DbError::from)?;
            Ok(found.is_some())
        })
        .await
    }

    pub async fn visibility(&self, resource: ResourceId) -> Visibility {
        self.read(move |tx| Ok(resources::get(tx, resource)?.visibility))
            .await
    }

    async fn read<T, F>(&self, query: F) -> T
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Transaction<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.db
            .run_in_transaction(&Context::background(), &TxOptions::read_only(), query)
            .await
            .expect("test query")
    }
}
