//! Pool topology: the backend targets a zone change is written to and the
//! nameservers that must confirm it.

use crate::config::{NameserverConfig, PoolManagerConfig, TargetConfig};
use crate::error::{PoolManagerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A verification target: a server that must answer authoritatively for the zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nameserver {
    pub host: String,
    pub port: u16,
}

impl Nameserver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Stable identity used as the status-store key
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Parse `host`, `host:port` or `[v6]:port`, defaulting to port 53
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().ok()?,
                None if tail.is_empty() => 53,
                None => return None,
            };
            return Some(Self::new(host, port));
        }
        match s.rsplit_once(':') {
            // more than one colon means a bare IPv6 address
            Some((host, port)) if !host.contains(':') => Some(Self::new(host, port.parse().ok()?)),
            _ => Some(Self::new(s, 53)),
        }
    }
}

impl fmt::Display for Nameserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<&NameserverConfig> for Nameserver {
    fn from(config: &NameserverConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }
}

/// A backend write destination
#[derive(Debug, Clone, PartialEq)]
pub struct PoolTarget {
    /// Unique within the topology, e.g. `default-0-bind9`
    pub id: String,
    pub backend_type: String,
    pub masters: Vec<Nameserver>,
    pub options: HashMap<String, String>,
}

impl PoolTarget {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    fn from_config(pool_id: &str, index: usize, config: &TargetConfig) -> Self {
        Self {
            id: format!("{}-{}-{}", pool_id, index, config.backend_type),
            backend_type: config.backend_type.clone(),
            masters: config.masters.iter().map(Nameserver::from).collect(),
            options: config.options.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub targets: Vec<PoolTarget>,
    pub nameservers: Vec<Nameserver>,
    /// NOTIFY-only servers; never verified and never counted
    pub also_notifies: Vec<Nameserver>,
    pub threshold_percentage: u8,
}

impl Pool {
    /// Number of SUCCESS results needed: ceil(N * T / 100)
    pub fn required_successes(&self) -> usize {
        required_successes(self.nameservers.len(), self.threshold_percentage)
    }

    pub fn has_nameserver(&self, nameserver: &Nameserver) -> bool {
        self.nameservers.contains(nameserver)
    }
}

pub fn required_successes(total: usize, threshold_percentage: u8) -> usize {
    (total * threshold_percentage as usize).div_ceil(100)
}

/// All pools known to this process, immutable after startup
#[derive(Debug, Clone, Default)]
pub struct PoolTopology {
    pools: HashMap<String, Arc<Pool>>,
}

impl PoolTopology {
    pub fn from_config(config: &PoolManagerConfig) -> Self {
        let pools = config
            .pools
            .iter()
            .map(|p| {
                let threshold = p
                    .threshold_percentage
                    .unwrap_or(config.threshold_percentage)
                    .min(100) as u8;
                let pool = Pool {
                    id: p.id.clone(),
                    name: p.name.clone().unwrap_or_else(|| p.id.clone()),
                    targets: p
                        .targets
                        .iter()
                        .enumerate()
                        .map(|(i, t)| PoolTarget::from_config(&p.id, i, t))
                        .collect(),
                    nameservers: p.nameservers.iter().map(Nameserver::from).collect(),
                    also_notifies: p.also_notifies.iter().map(Nameserver::from).collect(),
                    threshold_percentage: threshold,
                };
                debug!(
                    "Pool {}: {} targets, {} nameservers, threshold {}%",
                    pool.id,
                    pool.targets.len(),
                    pool.nameservers.len(),
                    pool.threshold_percentage
                );
                (pool.id.clone(), Arc::new(pool))
            })
            .collect();
        Self { pools }
    }

    pub fn from_pools(pools: impl IntoIterator<Item = Pool>) -> Self {
        Self {
            pools: pools
                .into_iter()
                .map(|p| (p.id.clone(), Arc::new(p)))
                .collect(),
        }
    }

    pub fn get(&self, pool_id: &str) -> Result<Arc<Pool>> {
        self.pools
            .get(pool_id)
            .cloned()
            .ok_or_else(|| PoolManagerError::PoolNotFound(pool_id.to_string()))
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_successes_rounds_up() {
        assert_eq!(required_successes(2, 100), 2);
        assert_eq!(required_successes(2, 50), 1);
        assert_eq!(required_successes(3, 50), 2);
        assert_eq!(required_successes(3, 34), 2);
        assert_eq!(required_successes(3, 33), 1);
        assert_eq!(required_successes(5, 0), 0);
        assert_eq!(required_successes(0, 100), 0);
    }

    #[test]
    fn test_nameserver_parse_and_display() {
        assert_eq!(Nameserver::parse("192.0.2.1"), Some(Nameserver::new("192.0.2.1", 53)));
        assert_eq!(
            Nameserver::parse("ns1.example.net:5353"),
            Some(Nameserver::new("ns1.example.net", 5353))
        );
        assert_eq!(Nameserver::parse("[2001:db8::1]:54"), Some(Nameserver::new("2001:db8::1", 54)));
        assert_eq!(Nameserver::parse("2001:db8::1"), Some(Nameserver::new("2001:db8::1", 53)));
        assert_eq!(Nameserver::parse("host:notaport"), None);
        assert_eq!(Nameserver::new("2001:db8::1", 53).to_string(), "[2001:db8::1]:53");
        assert_eq!(Nameserver::new("192.0.2.1", 53).key(), "192.0.2.1:53");
    }

    #[test]
    fn test_topology_from_config() {
        let config = PoolManagerConfig::from_toml(
            r#"
threshold_percentage = 80

[[pools]]
id = "default"

[[pools.targets]]
type = "fake"

[[pools.nameservers]]
host = "192.0.2.10"

[[pools]]
id = "lenient"
threshold_percentage = 50

[[pools.nameservers]]
host = "192.0.2.20"
port = 5300

[[pools.also_notifies]]
host = "192.0.2.30"
"#,
        )
        .unwrap();

        let topology = PoolTopology::from_config(&config);
        assert_eq!(topology.len(), 2);

        let default = topology.get("default").unwrap();
        assert_eq!(default.threshold_percentage, 80);
        assert_eq!(default.name, "default");
        assert_eq!(default.targets[0].id, "default-0-fake");

        let lenient = topology.get("lenient").unwrap();
        assert_eq!(lenient.threshold_percentage, 50);
        assert!(lenient.has_nameserver(&Nameserver::new("192.0.2.20", 5300)));
        assert_eq!(lenient.also_notifies, vec![Nameserver::new("192.0.2.30", 53)]);

        assert!(matches!(
            topology.get("missing"),
            Err(PoolManagerError::PoolNotFound(_))
        ));
    }
}
