//! Access to the authoritative zone store: the outbound consensus report and
//! the reads the engine and reconciler need.

pub mod memory;
pub mod sql;

use crate::error::Result;
use crate::model::{Context, Record, Status, Zone, ZoneAction, ZoneCriterion, ZoneStatus};
use crate::manager::serial::serial_gt;
use async_trait::async_trait;
use chrono::Utc;

/// What a store must do with a zone after a consensus is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Keep,
    /// The zone's DELETE propagated; remove it and its records
    Purge,
}

/// Fold a consensus into a zone row.
///
/// SUCCESS completes the pending action (ACTIVE, action NONE) and advances
/// the serial if the reported one is newer. ERROR marks the zone ERROR but
/// keeps the action so recovery knows what to re-verify.
pub fn apply_consensus(zone: &mut Zone, status: Status, serial: u32) -> Applied {
    zone.updated_at = Utc::now();
    match status {
        Status::Success if zone.action == ZoneAction::Delete => Applied::Purge,
        Status::Success => {
            zone.status = ZoneStatus::Active;
            zone.action = ZoneAction::None;
            if serial_gt(serial, zone.serial) {
                zone.serial = serial;
            }
            Applied::Keep
        }
        Status::Error => {
            zone.status = ZoneStatus::Error;
            Applied::Keep
        }
        Status::Pending => {
            zone.status = ZoneStatus::Pending;
            Applied::Keep
        }
    }
}

#[async_trait]
pub trait CentralStore: Send + Sync {
    /// Persist the consensus for a zone's pending action
    async fn update_status(
        &self,
        context: &Context,
        zone_id: &str,
        status: Status,
        serial: u32,
    ) -> Result<()>;

    /// Exactly one zone matching `criterion`, or `ZoneNotFound`
    async fn find_zone(&self, context: &Context, criterion: &ZoneCriterion) -> Result<Zone>;

    async fn find_zones(&self, context: &Context, criterion: &ZoneCriterion) -> Result<Vec<Zone>>;

    async fn find_records(&self, context: &Context, zone_id: &str) -> Result<Vec<Record>>;
}
