//! Periodic recovery and sync timers.
//!
//! Recovery re-verifies zones whose last consensus was not SUCCESS without
//! calling the backends again. Sync re-runs a full update for a batch of
//! zones to heal drift nobody reported.

use crate::config::PoolManagerConfig;
use crate::error::Result;
use crate::graceful_shutdown::GracefulShutdown;
use crate::manager::{PoolManager, PropagationState};
use crate::model::{Context, Zone, ZoneAction, ZoneCriterion, ZoneStatus};
use chrono::{TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// Zones worked on concurrently within one tick
const TICK_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub enable_recovery: bool,
    pub recovery_interval: Duration,
    /// PENDING zones younger than this are assumed to still be in flight
    pub pending_grace: Duration,
    pub enable_sync: bool,
    pub sync_interval: Duration,
    /// Only sync zones updated within this window; `None` syncs everything
    pub sync_window: Option<Duration>,
    pub max_zones_per_tick: usize,
    /// Status rows older than this are reaped after each sync tick
    pub status_ttl: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &PoolManagerConfig) -> Self {
        Self {
            enable_recovery: config.enable_recovery_timer,
            recovery_interval: Duration::from_secs(config.periodic_recovery_interval),
            pending_grace: Duration::from_secs(config.recovery_pending_grace),
            enable_sync: config.enable_sync_timer,
            sync_interval: Duration::from_secs(config.periodic_sync_interval),
            sync_window: config.periodic_sync_seconds.map(Duration::from_secs),
            max_zones_per_tick: config.max_zones_per_tick,
            status_ttl: config.status_store.ttl(),
        }
    }
}

/// Result of one timer tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub failed: usize,
    pub reaped: usize,
}

pub struct Reconciler {
    manager: PoolManager,
    settings: ReconcilerSettings,
}

fn ago(duration: Duration) -> chrono::DateTime<Utc> {
    let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
    Utc::now()
        .checked_sub_signed(delta)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

impl Reconciler {
    pub fn new(manager: PoolManager, settings: ReconcilerSettings) -> Self {
        Self { manager, settings }
    }

    /// Zones the recovery timer would pick up right now
    pub async fn recovery_candidates(&self, context: &Context) -> Result<Vec<Zone>> {
        let limit = self.settings.max_zones_per_tick;
        let central = self.manager.central();

        let mut zones = central
            .find_zones(
                context,
                &ZoneCriterion {
                    statuses: vec![ZoneStatus::Error],
                    limit: Some(limit),
                    ..Default::default()
                },
            )
            .await?;

        let remaining = limit.saturating_sub(zones.len());
        if remaining > 0 {
            let stuck = central
                .find_zones(
                    context,
                    &ZoneCriterion {
                        statuses: vec![ZoneStatus::Pending],
                        updated_before: Some(ago(self.settings.pending_grace)),
                        limit: Some(remaining),
                        ..Default::default()
                    },
                )
                .await?;
            zones.extend(stuck);
        }
        Ok(zones)
    }

    /// Re-verify ERROR zones and PENDING zones past the grace period
    pub async fn recover_once(&self) -> Result<TickSummary> {
        let context = Context::admin();
        let zones = self.recovery_candidates(&context).await?;
        if zones.is_empty() {
            debug!("Recovery tick: nothing to do");
            return Ok(TickSummary::default());
        }

        info!("Recovery tick: re-verifying {} zones", zones.len());
        let summary = self
            .run_batch("recovery", zones, |manager, context, zone| async move {
                manager.recover_zone(&context, &zone).await
            })
            .await;
        Ok(summary)
    }

    /// Re-run a full update for zones in the sync window, then reap stale rows
    pub async fn sync_once(&self) -> Result<TickSummary> {
        let context = Context::admin();
        let criterion = ZoneCriterion {
            updated_after: self.settings.sync_window.map(ago),
            limit: Some(self.settings.max_zones_per_tick),
            ..Default::default()
        };
        let zones: Vec<Zone> = self
            .manager
            .central()
            .find_zones(&context, &criterion)
            .await?
            .into_iter()
            // a pending delete is recovery's job; re-adding it would undo it
            .filter(|zone| zone.action != ZoneAction::Delete)
            .collect();

        info!("Sync tick: updating {} zones", zones.len());
        let mut summary = self
            .run_batch("sync", zones, |manager, context, zone| async move {
                manager.update_zone(&context, &zone).await
            })
            .await;

        match self
            .manager
            .status_store()
            .reap_stale(self.settings.status_ttl)
            .await
        {
            Ok(reaped) => {
                if reaped > 0 {
                    info!("Reaped {} stale status rows", reaped);
                }
                summary.reaped = reaped;
            }
            Err(e) => warn!("Failed to reap stale status rows: {}", e),
        }
        Ok(summary)
    }

    async fn run_batch<F, Fut>(&self, timer: &'static str, zones: Vec<Zone>, work: F) -> TickSummary
    where
        F: Fn(PoolManager, Context, Zone) -> Fut,
        Fut: Future<Output = Result<PropagationState>>,
    {
        let results: Vec<bool> = stream::iter(zones)
            .map(|zone| {
                let name = zone.name.clone();
                let fut = work(self.manager.clone(), Context::admin(), zone);
                async move {
                    match fut.await {
                        Ok(state) => {
                            debug!(zone = %name, timer, "Reconciled: {:?}", state);
                            !matches!(state, PropagationState::BackendFailed)
                        }
                        Err(e) => {
                            error!(zone = %name, timer, "Reconcile failed: {}", e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(TICK_CONCURRENCY)
            .collect()
            .await;

        let mut summary = TickSummary::default();
        for ok in results {
            self.manager.metrics().record_reconciled_zone(timer, ok);
            summary.processed += 1;
            if !ok {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Start the enabled timers; each stops when `shutdown` fires
    pub fn spawn(self: Arc<Self>, shutdown: &GracefulShutdown) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.settings.enable_recovery {
            let reconciler = Arc::clone(&self);
            let shutdown_rx = shutdown.subscribe();
            let period = self.settings.recovery_interval;
            handles.push(tokio::spawn(async move {
                reconciler
                    .timer_loop("recovery", period, shutdown_rx, |r| async move {
                        r.recover_once().await
                    })
                    .await
            }));
        }

        if self.settings.enable_sync {
            let reconciler = Arc::clone(&self);
            let shutdown_rx = shutdown.subscribe();
            let period = self.settings.sync_interval;
            handles.push(tokio::spawn(async move {
                reconciler
                    .timer_loop("sync", period, shutdown_rx, |r| async move {
                        r.sync_once().await
                    })
                    .await
            }));
        }

        handles
    }

    async fn timer_loop<F, Fut>(
        self: Arc<Self>,
        timer: &'static str,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
        tick: F,
    ) where
        F: Fn(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<TickSummary>>,
    {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Starting {} timer with interval: {:?}", timer, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tick(Arc::clone(&self)).await {
                        Ok(summary) => debug!(timer, "Tick finished: {:?}", summary),
                        Err(e) => error!(timer, "Tick failed: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Stopping {} timer", timer);
                    break;
                }
            }
        }
    }
}
