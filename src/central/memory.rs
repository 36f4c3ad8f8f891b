//! In-process central store. Keeps every report it receives so callers can
//! assert on what was sent upstream.

use super::{Applied, CentralStore, apply_consensus};
use crate::error::{PoolManagerError, Result};
use crate::model::{Context, Record, Status, Zone, ZoneCriterion};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub zone_id: String,
    pub status: Status,
    pub serial: u32,
}

#[derive(Debug, Default)]
pub struct MemoryCentralStore {
    zones: Mutex<HashMap<String, Zone>>,
    records: Mutex<Vec<Record>>,
    reports: Mutex<Vec<StatusReport>>,
    failures_remaining: AtomicUsize,
}

impl MemoryCentralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_zone(&self, zone: Zone) {
        self.zones.lock().insert(zone.id.clone(), zone);
    }

    pub fn insert_record(&self, record: Record) {
        self.records.lock().push(record);
    }

    pub fn zone(&self, zone_id: &str) -> Option<Zone> {
        self.zones.lock().get(zone_id).cloned()
    }

    /// Every `update_status` call that succeeded, in arrival order
    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().clone()
    }

    /// Make the next `count` calls to `update_status` fail
    pub fn fail_next_reports(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl CentralStore for MemoryCentralStore {
    async fn update_status(
        &self,
        _context: &Context,
        zone_id: &str,
        status: Status,
        serial: u32,
    ) -> Result<()> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PoolManagerError::Central("injected report failure".to_string()));
        }

        self.reports.lock().push(StatusReport {
            zone_id: zone_id.to_string(),
            status,
            serial,
        });

        let mut zones = self.zones.lock();
        if let Some(zone) = zones.get_mut(zone_id) {
            if apply_consensus(zone, status, serial) == Applied::Purge {
                zones.remove(zone_id);
                self.records.lock().retain(|r| r.zone_id != zone_id);
            }
        }
        debug!("Recorded {} (serial {}) for zone {}", status, serial, zone_id);
        Ok(())
    }

    async fn find_zone(&self, context: &Context, criterion: &ZoneCriterion) -> Result<Zone> {
        let mut zones = self.find_zones(context, criterion).await?;
        match zones.len() {
            1 => Ok(zones.remove(0)),
            0 => Err(PoolManagerError::ZoneNotFound(format!("{:?}", criterion))),
            n => Err(PoolManagerError::Central(format!(
                "expected one zone, found {}",
                n
            ))),
        }
    }

    async fn find_zones(&self, _context: &Context, criterion: &ZoneCriterion) -> Result<Vec<Zone>> {
        let mut zones: Vec<Zone> = self
            .zones
            .lock()
            .values()
            .filter(|z| criterion.matches(z))
            .cloned()
            .collect();
        zones.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        if let Some(limit) = criterion.limit {
            zones.truncate(limit);
        }
        Ok(zones)
    }

    async fn find_records(&self, _context: &Context, zone_id: &str) -> Result<Vec<Record>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.zone_id == zone_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ZoneAction, ZoneStatus};

    #[tokio::test]
    async fn test_injected_failures_are_not_recorded() {
        let store = MemoryCentralStore::new();
        let zone = Zone::new("example.com.", 3, "default");
        let zone_id = zone.id.clone();
        store.insert_zone(zone);

        store.fail_next_reports(1);
        let ctx = Context::admin();
        assert!(store.update_status(&ctx, &zone_id, Status::Success, 3).await.is_err());
        assert!(store.reports().is_empty());

        store.update_status(&ctx, &zone_id, Status::Success, 3).await.unwrap();
        assert_eq!(store.reports().len(), 1);
        assert_eq!(store.zone(&zone_id).unwrap().status, ZoneStatus::Active);
    }

    #[tokio::test]
    async fn test_delete_success_removes_zone() {
        let store = MemoryCentralStore::new();
        let mut zone = Zone::new("example.com.", 3, "default");
        zone.action = ZoneAction::Delete;
        let zone_id = zone.id.clone();
        store.insert_zone(zone);

        store
            .update_status(&Context::admin(), &zone_id, Status::Success, 3)
            .await
            .unwrap();
        assert!(store.zone(&zone_id).is_none());
        assert!(matches!(
            store
                .find_zone(&Context::admin(), &ZoneCriterion::by_id(&zone_id))
                .await,
            Err(PoolManagerError::ZoneNotFound(_))
        ));
    }
}
