//! tribe-daemon: hosts the expiry sweeper.
//!
//! Opens the shared database and sweeps expired shares on a timer until
//! Ctrl-C. Sharing requests come from other processes using the same
//! database through `tribe-sharing`.

mod config;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tribe_db::{Context, Database};
use tribe_sharing::{ExpirySweeper, SharingService};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_directives())?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tribe daemon starting");

    // 3. Open database
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("tribe.db");
    let db = Database::open(&db_path, config.db_config())?;
    info!(path = %db_path.display(), "database open");

    // 4. Start the sweeper
    let service = SharingService::new(db, config.sharing.clone());
    let ctx = Context::background();
    let mut sweeper = ExpirySweeper::new(service).spawn(ctx.clone());

    // 5. Run until Ctrl-C
    tokio::select! {
        result = &mut sweeper => {
            match result {
                Ok(total) => info!(total, "sweeper exited"),
                Err(e) => error!("sweeper task failed: {}", e),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown: let an in-flight sweep roll back.
    ctx.cancel();
    match sweeper.await {
        Ok(total) => info!(total, "daemon stopped"),
        Err(e) => error!("sweeper task failed: {}", e),
    }
    Ok(())
}
