//! Consistency status store: one row per (zone, action, nameserver) while a
//! propagation is in flight.
//!
//! Every write is a per-key upsert so concurrent verification units never
//! overwrite each other's rows.

pub mod memory;
pub mod redis;
pub mod sql;

use crate::config::StatusStoreConfig;
use crate::error::Result;
use crate::model::{Status, ZoneAction};
use crate::pool::Nameserver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub zone_id: String,
    pub action: ZoneAction,
    pub nameserver: Nameserver,
    pub status: Status,
    /// Serial observed on the nameserver, when one was seen
    pub serial: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(
        zone_id: &str,
        action: ZoneAction,
        nameserver: &Nameserver,
        status: Status,
        serial: Option<u32>,
    ) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            action,
            nameserver: nameserver.clone(),
            status,
            serial,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert or overwrite the row for (zone, action, nameserver)
    async fn store(
        &self,
        zone_id: &str,
        action: ZoneAction,
        nameserver: &Nameserver,
        status: Status,
        serial: Option<u32>,
    ) -> Result<()>;

    /// All live rows for (zone, action), in no particular order
    async fn retrieve(&self, zone_id: &str, action: ZoneAction) -> Result<Vec<StatusRecord>>;

    /// Remove every row for (zone, action)
    async fn clear(&self, zone_id: &str, action: ZoneAction) -> Result<()>;

    /// Delete rows not written for `max_age`; returns how many were removed
    async fn reap_stale(&self, _max_age: Duration) -> Result<usize> {
        Ok(0)
    }

    /// Release connections; later calls may fail
    async fn close(&self) {}

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Build the configured status store
pub async fn connect(config: &StatusStoreConfig) -> Result<Arc<dyn StatusStore>> {
    let store: Arc<dyn StatusStore> = match config {
        StatusStoreConfig::Memory { ttl } => {
            Arc::new(memory::MemoryStatusStore::new(Duration::from_secs(*ttl)))
        }
        StatusStoreConfig::Redis {
            url,
            key_prefix,
            ttl,
        } => Arc::new(self::redis::RedisStatusStore::new(url, key_prefix.clone(), *ttl).await?),
        StatusStoreConfig::Sql { url, .. } => Arc::new(sql::SqlStatusStore::connect(url).await?),
    };
    info!("Using {} status store", store.name());
    Ok(store)
}
