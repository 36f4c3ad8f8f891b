//! In-process backend that remembers serials and counts calls.
//!
//! Options: `fail` (bool) makes every mutation fail.

use super::Backend;
use crate::dns::client::WireClient;
use crate::error::{PoolManagerError, Result};
use crate::model::{Context, Zone};
use crate::pool::PoolTarget;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

const BACKEND_TYPE: &str = "fake";

#[derive(Debug, Default)]
pub struct FakeBackend {
    fail: AtomicBool,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    serials: Mutex<HashMap<String, u32>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let backend = Self::new();
        backend.set_failing(true);
        backend
    }

    pub fn build(target: &PoolTarget, _wire: Arc<dyn WireClient>) -> Result<Arc<dyn Backend>> {
        let backend = Self::new();
        if let Some(fail) = target.option("fail") {
            backend.set_failing(matches!(fail.to_lowercase().as_str(), "true" | "1" | "yes"));
        }
        Ok(Arc::new(backend))
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self, action: &str, zone: &Zone) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            debug!("Fake backend failing {} of {}", action, zone.name);
            return Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("forced failure on {} {}", action, zone.name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn backend_type(&self) -> &'static str {
        BACKEND_TYPE
    }

    async fn create_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check("create", zone)?;
        self.serials.lock().insert(zone.name.clone(), zone.serial);
        Ok(())
    }

    async fn update_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check("update", zone)?;
        self.serials.lock().insert(zone.name.clone(), zone.serial);
        Ok(())
    }

    async fn delete_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check("delete", zone)?;
        self.serials.lock().remove(&zone.name);
        Ok(())
    }

    async fn find_zone_serial(&self, zone_name: &str) -> Result<Option<u32>> {
        let serials = self.serials.lock();
        Ok(serials
            .iter()
            .find(|(name, _)| crate::dns::common::names_equal(name, zone_name))
            .map(|(_, serial)| *serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_backend_tracks_serials() {
        let backend = FakeBackend::new();
        let ctx = Context::admin();
        let mut zone = Zone::new("example.com.", 10, "default");

        backend.create_zone(&ctx, &zone).await.unwrap();
        zone.serial = 11;
        backend.update_zone(&ctx, &zone).await.unwrap();
        assert_eq!(backend.find_zone_serial("EXAMPLE.com").await.unwrap(), Some(11));

        backend.delete_zone(&ctx, &zone).await.unwrap();
        assert_eq!(backend.find_zone_serial("example.com.").await.unwrap(), None);
        assert_eq!(
            (backend.create_calls(), backend.update_calls(), backend.delete_calls()),
            (1, 1, 1)
        );
    }

    #[tokio::test]
    async fn test_failing_backend_still_counts_calls() {
        let backend = FakeBackend::failing();
        let zone = Zone::new("example.com.", 1, "default");
        assert!(backend.create_zone(&Context::admin(), &zone).await.is_err());
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(backend.find_zone_serial("example.com.").await.unwrap(), None);
    }
}
