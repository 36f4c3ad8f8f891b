use super::{StatusRecord, StatusStore};
use crate::error::Result;
use crate::model::{Status, ZoneAction};
use crate::pool::Nameserver;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

type StatusKey = (String, ZoneAction, Nameserver);

#[derive(Debug, Clone)]
struct Entry {
    record: StatusRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local status store. Rows expire `ttl` after their last write.
pub struct MemoryStatusStore {
    entries: Arc<DashMap<StatusKey, Entry>>,
    ttl: Duration,
}

impl MemoryStatusStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Evict expired entries
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!("Evicted {} expired status rows", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn store(
        &self,
        zone_id: &str,
        action: ZoneAction,
        nameserver: &Nameserver,
        status: Status,
        serial: Option<u32>,
    ) -> Result<()> {
        let record = StatusRecord::new(zone_id, action, nameserver, status, serial);
        let key = (zone_id.to_string(), action, nameserver.clone());
        self.entries.insert(
            key,
            Entry {
                record,
                expires_at: Instant::now() + self.ttl,
            },
        );
        trace!("Stored {} for {} {} on {}", status, action, zone_id, nameserver);
        Ok(())
    }

    async fn retrieve(&self, zone_id: &str, action: ZoneAction) -> Result<Vec<StatusRecord>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().0 == zone_id && e.key().1 == action)
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.value().record.clone())
            .collect())
    }

    async fn clear(&self, zone_id: &str, action: ZoneAction) -> Result<()> {
        self.entries
            .retain(|(zone, a, _), _| !(zone == zone_id && *a == action));
        Ok(())
    }

    async fn reap_stale(&self, max_age: Duration) -> Result<usize> {
        let mut reaped = self.evict_expired();
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(reaped);
        };
        let before = self.entries.len();
        self.entries.retain(|_, e| e.record.updated_at >= cutoff);
        reaped += before.saturating_sub(self.entries.len());
        Ok(reaped)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
