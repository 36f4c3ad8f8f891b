//! Redis-backed status store.
//!
//! Each (zone, action) is one hash keyed `{prefix}:{zone_id}:{action}` with a
//! field per nameserver. Every write refreshes the key's expiry, so an
//! abandoned propagation disappears on its own.

use super::{StatusRecord, StatusStore};
use crate::error::{PoolManagerError, Result};
use crate::model::{Status, ZoneAction};
use crate::pool::Nameserver;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct RedisStatusStore {
    client: ConnectionManager,
    key_prefix: String,
    ttl: u64,
}

impl RedisStatusStore {
    pub async fn new(redis_url: &str, key_prefix: String, ttl: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            PoolManagerError::Redis(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| PoolManagerError::Redis(format!("Failed to connect to Redis: {}", e)))?;

        let store = Self {
            client: connection_manager,
            key_prefix,
            ttl: ttl.max(1),
        };
        store.ping().await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(store)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.client.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn redis_key(&self, zone_id: &str, action: ZoneAction) -> String {
        format!("{}:{}:{}", self.key_prefix, zone_id, action)
    }
}

fn encode(record: &StatusRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| PoolManagerError::StatusStore(format!("Failed to encode status: {}", e)))
}

fn decode(data: &[u8]) -> Result<StatusRecord> {
    bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map(|(record, _)| record)
        .map_err(|e| PoolManagerError::StatusStore(format!("Failed to decode status: {}", e)))
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn store(
        &self,
        zone_id: &str,
        action: ZoneAction,
        nameserver: &Nameserver,
        status: Status,
        serial: Option<u32>,
    ) -> Result<()> {
        let key = self.redis_key(zone_id, action);
        let data = encode(&StatusRecord::new(zone_id, action, nameserver, status, serial))?;
        let mut conn = self.client.clone();

        let _: () = redis::pipe()
            .atomic()
            .hset(&key, nameserver.key(), data)
            .ignore()
            .expire(&key, self.ttl as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("Stored {} for {} {} on {} (TTL: {}s)", status, action, zone_id, nameserver, self.ttl);
        Ok(())
    }

    async fn retrieve(&self, zone_id: &str, action: ZoneAction) -> Result<Vec<StatusRecord>> {
        let key = self.redis_key(zone_id, action);
        let mut conn = self.client.clone();
        let fields: HashMap<String, Vec<u8>> = conn.hgetall(&key).await?;

        let mut records = Vec::with_capacity(fields.len());
        for (field, data) in fields {
            match decode(&data) {
                Ok(record) => records.push(record),
                // A corrupt row is dropped rather than blocking the whole set
                Err(e) => warn!("Skipping status field {} of {}: {}", field, key, e),
            }
        }
        Ok(records)
    }

    async fn clear(&self, zone_id: &str, action: ZoneAction) -> Result<()> {
        let key = self.redis_key(zone_id, action);
        let mut conn = self.client.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let record = StatusRecord::new(
            "zone-1",
            ZoneAction::Update,
            &Nameserver::new("192.0.2.1", 53),
            Status::Success,
            Some(2024010101),
        );
        let data = encode(&record).unwrap();
        assert_eq!(decode(&data).unwrap(), record);
        assert!(decode(&data[..data.len() / 2]).is_err());
    }
}
