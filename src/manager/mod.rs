//! Pool manager engine.
//!
//! For each zone change: dispatch to every backend target of the zone's pool,
//! then verify every nameserver with NOTIFY and SOA polling, record each
//! result in the status store and report the threshold consensus upstream.

pub mod consensus;
pub mod serial;

use crate::backend::Backends;
use crate::central::CentralStore;
use crate::config::PoolManagerConfig;
use crate::dns::client::{Outcome, ProbeOptions, WireClient};
use crate::error::{PoolManagerError, Result};
use crate::metrics::PoolManagerMetrics;
use crate::model::{Context, Status, Zone, ZoneAction};
use crate::pool::{Nameserver, Pool, PoolTopology};
use crate::status::StatusStore;
use consensus::Consensus;
use dashmap::DashMap;
use futures::future::join_all;
use serial::serial_gte;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, error, info, warn};

/// Where a propagation attempt ended up when the engine returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationState {
    Started,
    DispatchingBackends,
    /// Verification is still running or waiting for late results
    Verifying,
    ConsensusReached(Status),
    /// Every backend target failed; ERROR was reported without touching the network
    BackendFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub probe: ProbeOptions,
    /// Sleep before the first NOTIFY/poll of each nameserver
    pub poll_delay: Duration,
    /// Spawn verification units instead of awaiting them
    pub async_verification: bool,
    pub report_max_attempts: usize,
    /// First backoff delay between report attempts
    pub report_retry_base: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &PoolManagerConfig) -> Self {
        Self {
            probe: ProbeOptions::from_config(config),
            poll_delay: config.poll_delay(),
            async_verification: config.async_verification,
            report_max_attempts: config.report_max_attempts,
            report_retry_base: Duration::from_millis(100),
        }
    }
}

/// Backend serial as seen by one pool target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSerial {
    pub target_id: String,
    pub backend_type: String,
    pub serial: std::result::Result<Option<u32>, String>,
}

type ActionKey = (String, ZoneAction);

#[derive(Clone)]
pub struct PoolManager {
    topology: Arc<PoolTopology>,
    backends: Backends,
    wire: Arc<dyn WireClient>,
    status_store: Arc<dyn StatusStore>,
    central: Arc<dyn CentralStore>,
    settings: EngineSettings,
    metrics: Arc<PoolManagerMetrics>,
    report_locks: Arc<DashMap<ActionKey, Arc<Mutex<()>>>>,
}

/// Rows are tracked under the action being propagated; a zone with no
/// pending action is re-verified as an update.
fn effective_action(action: ZoneAction) -> ZoneAction {
    match action {
        ZoneAction::None => ZoneAction::Update,
        other => other,
    }
}

impl PoolManager {
    pub fn new(
        topology: Arc<PoolTopology>,
        backends: Backends,
        wire: Arc<dyn WireClient>,
        status_store: Arc<dyn StatusStore>,
        central: Arc<dyn CentralStore>,
        settings: EngineSettings,
        metrics: Arc<PoolManagerMetrics>,
    ) -> Self {
        Self {
            topology,
            backends,
            wire,
            status_store,
            central,
            settings,
            metrics,
            report_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn topology(&self) -> &PoolTopology {
        &self.topology
    }

    pub fn central(&self) -> &Arc<dyn CentralStore> {
        &self.central
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status_store
    }

    pub fn metrics(&self) -> &Arc<PoolManagerMetrics> {
        &self.metrics
    }

    pub async fn create_zone(&self, context: &Context, zone: &Zone) -> Result<PropagationState> {
        self.propagate_action(context, zone, ZoneAction::Create).await
    }

    pub async fn update_zone(&self, context: &Context, zone: &Zone) -> Result<PropagationState> {
        self.propagate_action(context, zone, ZoneAction::Update).await
    }

    pub async fn delete_zone(&self, context: &Context, zone: &Zone) -> Result<PropagationState> {
        self.propagate_action(context, zone, ZoneAction::Delete).await
    }

    /// Propagate whatever action the zone currently has pending
    pub async fn propagate(&self, context: &Context, zone: &Zone) -> Result<PropagationState> {
        self.propagate_action(context, zone, effective_action(zone.action))
            .await
    }

    async fn propagate_action(
        &self,
        context: &Context,
        zone: &Zone,
        action: ZoneAction,
    ) -> Result<PropagationState> {
        let pool = self.topology.get(&zone.pool_id)?;
        let mut zone = zone.clone();
        zone.action = action;

        info!(
            zone = %zone.name,
            action = %action,
            serial = zone.serial,
            pool = %pool.id,
            "Starting propagation"
        );
        debug!(zone = %zone.name, state = ?PropagationState::Started, "Clearing previous attempt");
        self.status_store.clear(&zone.id, action).await?;

        debug!(zone = %zone.name, state = ?PropagationState::DispatchingBackends, "Dispatching to {} targets", pool.targets.len());
        let succeeded = self.dispatch_backends(context, &pool, &zone, action).await;

        if succeeded == 0 && !pool.targets.is_empty() {
            warn!(
                zone = %zone.name,
                action = %action,
                "All {} backend targets failed, reporting ERROR without verification",
                pool.targets.len()
            );
            for nameserver in &pool.nameservers {
                self.status_store
                    .store(&zone.id, action, nameserver, Status::Error, None)
                    .await?;
            }
            self.metrics.record_consensus(action.as_str(), Status::Error.as_str());
            if self.report(context, &zone, Status::Error, zone.serial).await {
                self.status_store.clear(&zone.id, action).await?;
            }
            return Ok(PropagationState::BackendFailed);
        }

        self.notify_also_notifies(&pool, &zone, action).await;
        self.verify(context, &pool, &zone, action).await
    }

    /// Re-verify a zone's pending action without touching the backends
    pub async fn recover_zone(&self, context: &Context, zone: &Zone) -> Result<PropagationState> {
        let pool = self.topology.get(&zone.pool_id)?;
        let action = effective_action(zone.action);
        let mut zone = zone.clone();
        zone.action = action;

        info!(zone = %zone.name, action = %action, "Recovering zone");
        self.status_store.clear(&zone.id, action).await?;
        self.verify(context, &pool, &zone, action).await
    }

    /// Record one nameserver's result and report the consensus once reached.
    ///
    /// Results for a (zone, action) with no status rows are ignored: the
    /// attempt was never started, has already been reported, or expired.
    /// Returns the consensus computed after the write, if any.
    pub async fn update_status(
        &self,
        context: &Context,
        zone: &Zone,
        nameserver: &Nameserver,
        status: Status,
        observed_serial: Option<u32>,
    ) -> Result<Option<Consensus>> {
        let pool = self.topology.get(&zone.pool_id)?;
        let action = effective_action(zone.action);

        if !pool.has_nameserver(nameserver) {
            warn!(
                zone = %zone.name,
                "Ignoring status from {} which is not in pool {}",
                nameserver, pool.id
            );
            return Ok(None);
        }

        self.with_action_lock(&zone.id, action, async {
            if self.status_store.retrieve(&zone.id, action).await?.is_empty() {
                debug!(
                    zone = %zone.name,
                    action = %action,
                    "No propagation in flight, ignoring {} from {}",
                    status, nameserver
                );
                return Ok(None);
            }

            self.status_store
                .store(&zone.id, action, nameserver, status, observed_serial)
                .await?;
            let consensus = self.evaluate_and_report(context, &pool, zone, action).await?;
            Ok::<_, PoolManagerError>(Some(consensus))
        })
        .await
    }

    /// Number of (zone, action) pairs currently holding a report lock
    pub fn locked_actions(&self) -> usize {
        self.report_locks.len()
    }

    /// Ask every backend target of a pool for the serial it holds
    pub async fn target_serials(&self, pool_id: &str, zone_name: &str) -> Result<Vec<TargetSerial>> {
        let pool = self.topology.get(pool_id)?;
        let lookups = pool.targets.iter().map(|target| async move {
            let serial = match self.backends.get(&target.id) {
                Some(backend) => backend
                    .find_zone_serial(zone_name)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("no backend instance".to_string()),
            };
            TargetSerial {
                target_id: target.id.clone(),
                backend_type: target.backend_type.clone(),
                serial,
            }
        });
        Ok(join_all(lookups).await)
    }

    async fn dispatch_backends(
        &self,
        context: &Context,
        pool: &Pool,
        zone: &Zone,
        action: ZoneAction,
    ) -> usize {
        let calls = pool.targets.iter().map(|target| async move {
            let Some(backend) = self.backends.get(&target.id) else {
                error!("No backend instance for target {}", target.id);
                return false;
            };
            let result = match action {
                ZoneAction::Create => backend.create_zone(context, zone).await,
                ZoneAction::Delete => backend.delete_zone(context, zone).await,
                ZoneAction::Update | ZoneAction::None => backend.update_zone(context, zone).await,
            };
            let ok = match result {
                Ok(()) => {
                    debug!(zone = %zone.name, target = %target.id, "Backend {} succeeded", action);
                    true
                }
                Err(e) => {
                    warn!(zone = %zone.name, target = %target.id, "Backend {} failed: {}", action, e);
                    false
                }
            };
            self.metrics
                .record_backend_call(backend.backend_type(), action.as_str(), ok);
            ok
        });

        join_all(calls).await.into_iter().filter(|ok| *ok).count()
    }

    /// Best-effort NOTIFY to servers that are never verified
    async fn notify_also_notifies(&self, pool: &Pool, zone: &Zone, action: ZoneAction) {
        if action == ZoneAction::Delete || pool.also_notifies.is_empty() {
            return;
        }
        let options = ProbeOptions {
            max_retries: 1,
            ..self.settings.probe
        };
        let notifies = pool.also_notifies.iter().map(|server| {
            let options = &options;
            async move {
                let probe = self.wire.send_notify(&zone.name, server, options).await;
                self.metrics.record_wire_request("notify", probe.outcome.as_str());
                if probe.outcome != Outcome::Ok {
                    debug!(zone = %zone.name, "Also-notify to {} ended with {}", server, probe.outcome);
                }
            }
        });
        join_all(notifies).await;
    }

    async fn verify(
        &self,
        context: &Context,
        pool: &Arc<Pool>,
        zone: &Zone,
        action: ZoneAction,
    ) -> Result<PropagationState> {
        debug!(zone = %zone.name, state = ?PropagationState::Verifying, "Verifying {} nameservers", pool.nameservers.len());
        for nameserver in &pool.nameservers {
            self.status_store
                .store(&zone.id, action, nameserver, Status::Pending, None)
                .await?;
        }

        if self.settings.async_verification && !pool.nameservers.is_empty() {
            for nameserver in pool.nameservers.iter().cloned() {
                let manager = self.clone();
                let context = context.clone();
                let zone = zone.clone();
                tokio::spawn(async move {
                    let (status, serial) = manager.verify_nameserver(&zone, action, &nameserver).await;
                    if let Err(e) = manager
                        .update_status(&context, &zone, &nameserver, status, serial)
                        .await
                    {
                        error!(zone = %zone.name, "Failed to record result from {}: {}", nameserver, e);
                    }
                });
            }
            return Ok(PropagationState::Verifying);
        }

        let units = pool.nameservers.iter().map(|nameserver| async move {
            let (status, serial) = self.verify_nameserver(zone, action, nameserver).await;
            self.status_store
                .store(&zone.id, action, nameserver, status, serial)
                .await
        });
        for result in join_all(units).await {
            result?;
        }

        let consensus = self
            .with_action_lock(&zone.id, action, self.evaluate_and_report(context, pool, zone, action))
            .await?;

        Ok(match consensus {
            Consensus::Pending { .. } => PropagationState::Verifying,
            final_consensus => PropagationState::ConsensusReached(final_consensus.status()),
        })
    }

    /// NOTIFY then poll one nameserver until it converges or the budget runs out
    async fn verify_nameserver(
        &self,
        zone: &Zone,
        action: ZoneAction,
        nameserver: &Nameserver,
    ) -> (Status, Option<u32>) {
        let started = Instant::now();
        self.metrics.verification_started();
        let (status, serial) = self.poll_nameserver(zone, action, nameserver).await;
        self.metrics.verification_finished();
        self.metrics
            .record_verification(action.as_str(), status.as_str(), started.elapsed());

        info!(
            zone = %zone.name,
            action = %action,
            nameserver = %nameserver,
            status = %status,
            serial = ?serial,
            "Nameserver verification finished"
        );
        (status, serial)
    }

    async fn poll_nameserver(
        &self,
        zone: &Zone,
        action: ZoneAction,
        nameserver: &Nameserver,
    ) -> (Status, Option<u32>) {
        let probe_options = self.settings.probe;
        sleep(self.settings.poll_delay).await;

        if action != ZoneAction::Delete {
            let notify = self
                .wire
                .send_notify(&zone.name, nameserver, &probe_options)
                .await;
            self.metrics.record_wire_request("notify", notify.outcome.as_str());
            if notify.outcome != Outcome::Ok {
                debug!(zone = %zone.name, "NOTIFY to {} ended with {}", nameserver, notify.outcome);
            }
        }

        let mut remaining = probe_options.max_retries.max(1);
        loop {
            let probe = self
                .wire
                .query_serial(
                    &zone.name,
                    nameserver,
                    &ProbeOptions {
                        max_retries: remaining,
                        ..probe_options
                    },
                )
                .await;
            self.metrics.record_wire_request("soa", probe.outcome.as_str());
            remaining = remaining.saturating_sub(probe.attempts.max(1));

            match (action, probe.outcome) {
                (ZoneAction::Delete, Outcome::NoDomain(_)) => return (Status::Success, None),
                // zone still served, or not yet served: keep polling
                (ZoneAction::Delete, Outcome::Ok) | (_, Outcome::NoDomain(_)) => {}
                (_, Outcome::Ok) => {
                    if let Some(observed) = probe.serial.filter(|s| serial_gte(*s, zone.serial)) {
                        return (Status::Success, Some(observed));
                    }
                }
                (_, outcome) => {
                    debug!(zone = %zone.name, "Polling {} failed: {}", nameserver, outcome);
                    return (Status::Error, probe.serial);
                }
            }

            if remaining == 0 {
                debug!(
                    zone = %zone.name,
                    "{} did not converge (last {} serial {:?}, expected {})",
                    nameserver, probe.outcome, probe.serial, zone.serial
                );
                return (Status::Error, probe.serial);
            }
            sleep(probe_options.retry_interval).await;
        }
    }

    /// Evaluate the current rows and report a final consensus.
    /// Callers hold the (zone, action) lock.
    async fn evaluate_and_report(
        &self,
        context: &Context,
        pool: &Pool,
        zone: &Zone,
        action: ZoneAction,
    ) -> Result<Consensus> {
        let records: Vec<_> = self
            .status_store
            .retrieve(&zone.id, action)
            .await?
            .into_iter()
            .filter(|r| pool.has_nameserver(&r.nameserver))
            .collect();

        let consensus = consensus::evaluate(
            &records,
            pool.nameservers.len(),
            pool.threshold_percentage,
            zone.serial,
        );

        let (status, serial) = match consensus {
            Consensus::Success { serial } => (Status::Success, serial),
            Consensus::Error { serial } => (Status::Error, serial),
            Consensus::Pending {
                successes,
                required,
                outstanding,
            } => {
                debug!(
                    zone = %zone.name,
                    action = %action,
                    "Consensus pending: {}/{} successes, {} outstanding",
                    successes, required, outstanding
                );
                return Ok(consensus);
            }
        };

        info!(
            zone = %zone.name,
            action = %action,
            status = %status,
            serial,
            "Consensus reached"
        );
        self.metrics.record_consensus(action.as_str(), status.as_str());

        if self.report(context, zone, status, serial).await {
            self.status_store.clear(&zone.id, action).await?;
        }
        Ok(consensus)
    }

    /// Deliver a consensus to the central store with bounded retries.
    /// Returns whether the report was confirmed.
    async fn report(&self, context: &Context, zone: &Zone, status: Status, serial: u32) -> bool {
        let base = self.settings.report_retry_base.as_millis().max(1) as u64;
        // base, 2*base, 4*base, ... capped at 10s
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(base.div_ceil(2))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.settings.report_max_attempts.saturating_sub(1));

        let result = RetryIf::start(
            strategy,
            || self.central.update_status(context, &zone.id, status, serial),
            |e: &PoolManagerError| !matches!(e, PoolManagerError::ZoneNotFound(_)),
        )
        .await;

        match result {
            Ok(()) => {
                debug!(zone = %zone.name, "Reported {} serial {}", status, serial);
                true
            }
            Err(e) => {
                self.metrics.record_report_failure();
                error!(
                    zone = %zone.name,
                    "Failed to report {} serial {} after {} attempts: {}",
                    status, serial, self.settings.report_max_attempts, e
                );
                false
            }
        }
    }

    /// Run `work` while holding the (zone, action) lock, then drop the map
    /// entry if no other caller is waiting on it.
    async fn with_action_lock<T>(
        &self,
        zone_id: &str,
        action: ZoneAction,
        work: impl Future<Output = T>,
    ) -> T {
        let key = (zone_id.to_string(), action);
        let lock = self.report_locks.entry(key.clone()).or_default().clone();

        let guard = lock.lock().await;
        let output = work.await;
        drop(guard);

        // one reference in the map, one held here
        self.report_locks
            .remove_if(&key, |_, entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) <= 2);
        output
    }
}
