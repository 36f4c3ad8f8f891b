//! Backend driver adapter.
//!
//! Each pool target is served by one driver. Drivers are looked up by their
//! type tag in a static registry and constructed once at startup.

pub mod bind9;
pub mod fake;
pub mod powerdns;

use crate::dns::client::WireClient;
use crate::error::{PoolManagerError, Result};
use crate::model::{Context, Zone};
use crate::pool::{PoolTarget, PoolTopology};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default timeout for control-plane HTTP calls
pub(crate) const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Backend: Send + Sync {
    /// The registry tag this driver was built from
    fn backend_type(&self) -> &'static str;

    async fn create_zone(&self, context: &Context, zone: &Zone) -> Result<()>;

    async fn update_zone(&self, context: &Context, zone: &Zone) -> Result<()>;

    async fn delete_zone(&self, context: &Context, zone: &Zone) -> Result<()>;

    /// Serial the target currently holds for `zone_name`, if it has the zone
    async fn find_zone_serial(&self, zone_name: &str) -> Result<Option<u32>>;
}

pub type BackendConstructor = fn(&PoolTarget, Arc<dyn WireClient>) -> Result<Arc<dyn Backend>>;

const REGISTRY: &[(&str, BackendConstructor)] = &[
    ("bind9", bind9::Bind9Backend::build),
    ("powerdns", powerdns::PowerDnsBackend::build),
    ("fake", fake::FakeBackend::build),
];

pub const SUPPORTED_BACKENDS: &[&str] = &["bind9", "powerdns", "fake"];

pub fn is_supported(backend_type: &str) -> bool {
    lookup(backend_type).is_some()
}

pub fn lookup(backend_type: &str) -> Option<BackendConstructor> {
    REGISTRY
        .iter()
        .find(|(tag, _)| *tag == backend_type)
        .map(|(_, constructor)| *constructor)
}

/// Driver instances keyed by pool target id
#[derive(Clone, Default)]
pub struct Backends {
    by_target: HashMap<String, Arc<dyn Backend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a driver for every target in `topology`
    pub fn from_topology(topology: &PoolTopology, wire: Arc<dyn WireClient>) -> Result<Self> {
        let mut backends = Self::new();
        for pool in topology.pools() {
            for target in &pool.targets {
                let constructor = lookup(&target.backend_type).ok_or_else(|| {
                    PoolManagerError::backend(&target.backend_type, "unknown backend type")
                })?;
                let backend = constructor(target, wire.clone())?;
                info!(
                    "Initialised {} backend for target {} in pool {}",
                    target.backend_type, target.id, pool.id
                );
                backends.insert(&target.id, backend);
            }
        }
        Ok(backends)
    }

    pub fn insert(&mut self, target_id: &str, backend: Arc<dyn Backend>) {
        self.by_target.insert(target_id.to_string(), backend);
    }

    pub fn with(mut self, target_id: &str, backend: Arc<dyn Backend>) -> Self {
        self.insert(target_id, backend);
        self
    }

    pub fn get(&self, target_id: &str) -> Option<Arc<dyn Backend>> {
        self.by_target.get(target_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}

/// Read an option as seconds, falling back to `default`
pub(crate) fn duration_option(target: &PoolTarget, key: &str, default: Duration) -> Result<Duration> {
    match target.option(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                PoolManagerError::backend(
                    &target.backend_type,
                    format!("option {} is not a number of seconds: {}", key, value),
                )
            }),
        None => Ok(default),
    }
}

pub(crate) fn required_option<'a>(target: &'a PoolTarget, key: &str) -> Result<&'a str> {
    target.option(key).ok_or_else(|| {
        PoolManagerError::backend(
            &target.backend_type,
            format!("target {} is missing option {}", target.id, key),
        )
    })
}
