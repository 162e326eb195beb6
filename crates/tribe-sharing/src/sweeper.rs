//! Expiry sweep: tombstone shares whose expiry has passed.
//!
//! Expired shares are already invisible to every listing; the sweep only
//! makes that permanent and demotes the owners they justified. It can run
//! on demand ([`SharingService::sweep_expired`]) or on a timer
//! ([`ExpirySweeper`]).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tribe_db::queries::shares;
use tribe_db::Context;

use crate::{ownership, Result, SharingService};

impl SharingService {
    /// Tombstone every active share with `expires_at <= now` in one
    /// transaction. Returns how many were cleaned; a second run with no time
    /// passing finds nothing.
    pub async fn sweep_expired(&self, ctx: &Context) -> Result<usize> {
        let clock = Arc::clone(&self.clock);
        let opts = self.config.write_options();
        let swept = self
            .db
            .run_in_transaction(ctx, &opts, move |tx| -> Result<usize> {
                let now = clock.now();
                let expired = shares::list_expired_active(tx, now)?;
                for share in &expired {
                    debug_assert!(share.is_expired(now), "swept a visible share");
                    shares::soft_delete(tx, share.id, now)?;
                    ownership::demote(tx, share.resource_id, share.group_id, now)?;
                }
                Ok(expired.len())
            })
            .await
            .map_err(|e| e.in_op("sweep expired"))?;

        if swept > 0 {
            info!(swept, "expired shares swept");
        } else {
            debug!("no expired shares");
        }
        Ok(swept)
    }
}

/// Runs [`SharingService::sweep_expired`] every `interval` until cancelled.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    service: SharingService,
    interval: Duration,
}

impl ExpirySweeper {
    /// Sweeper using the service's configured interval.
    pub fn new(service: SharingService) -> Self {
        let interval = service.config().sweep_interval();
        Self::with_interval(service, interval)
    }

    pub fn with_interval(service: SharingService, interval: Duration) -> Self {
        Self {
            service,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep on every tick, starting immediately, until `ctx` is done.
    ///
    /// A failed sweep is logged and retried on the next tick. Returns the
    /// total number of shares swept.
    pub async fn run(&self, ctx: Context) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = 0;

        info!(interval = ?self.interval, "expiry sweeper started");
        loop {
            tokio::select! {
                biased;
                reason = ctx.done() => {
                    info!(total, %reason, "expiry sweeper stopped");
                    return total;
                }
                _ = ticker.tick() => {
                    match self.service.sweep_expired(&ctx).await {
                        Ok(swept) => total += swept,
                        Err(err) if ctx.is_cancelled() => debug!(%err, "sweep interrupted"),
                        Err(err) => warn!(%err, "expiry sweep failed"),
                    }
                }
            }
        }
    }

    /// Run the sweeper on the current runtime.
    pub fn spawn(self, ctx: Context) -> JoinHandle<usize> {
        tokio::spawn(async move { self.run(ctx).await })
    }
}
