use crate::backend;
use crate::dns::tsig::TsigKey;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Where per-nameserver status rows are kept
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StatusStoreConfig {
    /// Process-local map; rows expire after `ttl` seconds
    Memory {
        #[serde(default = "default_status_ttl")]
        ttl: u64,
    },
    /// Shared Redis hash per (zone, action); keys expire after `ttl` seconds
    Redis {
        url: String,
        #[serde(default = "default_redis_prefix")]
        key_prefix: String,
        #[serde(default = "default_status_ttl")]
        ttl: u64,
    },
    /// Relational table; stale rows are reaped by the sync timer
    Sql {
        url: String,
        #[serde(default = "default_status_ttl")]
        ttl: u64,
    },
}

impl StatusStoreConfig {
    pub fn ttl(&self) -> Duration {
        match self {
            StatusStoreConfig::Memory { ttl }
            | StatusStoreConfig::Redis { ttl, .. }
            | StatusStoreConfig::Sql { ttl, .. } => Duration::from_secs(*ttl),
        }
    }
}

fn default_status_ttl() -> u64 {
    3600
}

fn default_redis_prefix() -> String {
    "zonepool:status".to_string()
}

fn default_dns_port() -> u16 {
    53
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NameserverConfig {
    pub host: String,
    #[serde(default = "default_dns_port")]
    pub port: u16,
    /// Name of an entry in `tsig_keys` used to sign traffic to this server
    #[serde(default)]
    pub tsig_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetConfig {
    /// Backend type tag, e.g. "bind9" or "powerdns"
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Servers the target should transfer the zone from
    #[serde(default)]
    pub masters: Vec<NameserverConfig>,
    /// Driver-specific connection options (host, port, api_url, api_key, ...)
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides the global threshold for this pool
    #[serde(default)]
    pub threshold_percentage: Option<u16>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub nameservers: Vec<NameserverConfig>,
    #[serde(default)]
    pub also_notifies: Vec<NameserverConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TsigKeyConfig {
    pub name: String,
    #[serde(default = "default_tsig_algorithm")]
    pub algorithm: String,
    /// Base64 shared secret
    pub secret: String,
}

fn default_tsig_algorithm() -> String {
    "hmac-sha256".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolManagerConfig {
    /// Percentage of nameservers that must confirm a change (0-100)
    pub threshold_percentage: u16,

    /// Seconds to wait for each DNS response
    pub poll_timeout: u64,

    /// Seconds to sleep between polling attempts
    pub poll_retry_interval: u64,

    /// Total attempts per nameserver per propagation
    pub poll_max_retries: u32,

    /// Seconds to wait after backend dispatch before the first NOTIFY/poll
    pub poll_delay: u64,

    pub enable_recovery_timer: bool,

    /// Seconds between recovery passes
    pub periodic_recovery_interval: u64,

    pub enable_sync_timer: bool,

    /// Seconds between sync passes
    pub periodic_sync_interval: u64,

    /// Only sync zones changed within this many seconds (None = all zones)
    pub periodic_sync_seconds: Option<u64>,

    /// Upper bound on zones handled by one timer tick
    pub max_zones_per_tick: usize,

    /// PENDING zones untouched for this many seconds are treated as abandoned
    pub recovery_pending_grace: u64,

    /// Use TCP for all DNS wire traffic
    pub all_tcp: bool,

    /// Spawn verification and feed results through `update_status`
    pub async_verification: bool,

    /// Attempts to deliver a consensus to the central store
    pub report_max_attempts: usize,

    /// Backend type tags that may be used by pool targets
    pub backends: Vec<String>,

    pub status_store: StatusStoreConfig,

    /// Database holding the authoritative zone table
    pub central_url: String,

    /// HTTP server bind address for metrics and health checks (None = disabled)
    pub http_bind_addr: Option<SocketAddr>,

    pub tsig_keys: Vec<TsigKeyConfig>,

    pub pools: Vec<PoolConfig>,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            threshold_percentage: 100,
            poll_timeout: 30,
            poll_retry_interval: 15,
            poll_max_retries: 10,
            poll_delay: 5,
            enable_recovery_timer: true,
            periodic_recovery_interval: 120,
            enable_sync_timer: true,
            periodic_sync_interval: 1800,
            periodic_sync_seconds: None,
            max_zones_per_tick: 100,
            recovery_pending_grace: 600,
            all_tcp: false,
            async_verification: false,
            report_max_attempts: 3,
            backends: backend::SUPPORTED_BACKENDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            status_store: StatusStoreConfig::Memory {
                ttl: default_status_ttl(),
            },
            central_url: "sqlite://zonepool.db?mode=rwc".to_string(),
            http_bind_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9053))),
            tsig_keys: vec![],
            pools: vec![],
        }
    }
}

impl PoolManagerConfig {
    /// Load from an optional TOML file, apply `ZONEPOOL_*` overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml(&content)?;
        info!(
            "Loaded configuration from {} ({} pools)",
            path.display(),
            config.pools.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply overrides from an environment-like lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ZONEPOOL_THRESHOLD_PERCENTAGE") {
            self.threshold_percentage = parse_number("threshold_percentage", &value)?;
        }

        if let Some(value) = lookup("ZONEPOOL_POLL_TIMEOUT") {
            self.poll_timeout = parse_number("poll_timeout", &value)?;
        }

        if let Some(value) = lookup("ZONEPOOL_POLL_RETRY_INTERVAL") {
            self.poll_retry_interval = parse_number("poll_retry_interval", &value)?;
        }

        if let Some(value) = lookup("ZONEPOOL_POLL_MAX_RETRIES") {
            self.poll_max_retries = parse_number("poll_max_retries", &value)?;
        }

        if let Some(value) = lookup("ZONEPOOL_POLL_DELAY") {
            self.poll_delay = parse_number("poll_delay", &value)?;
        }

        if let Some(value) = lookup("ZONEPOOL_ENABLE_RECOVERY_TIMER") {
            self.enable_recovery_timer = parse_bool(&value, self.enable_recovery_timer);
        }

        if let Some(value) = lookup("ZONEPOOL_ENABLE_SYNC_TIMER") {
            self.enable_sync_timer = parse_bool(&value, self.enable_sync_timer);
        }

        if let Some(value) = lookup("ZONEPOOL_ALL_TCP") {
            self.all_tcp = parse_bool(&value, self.all_tcp);
        }

        if let Some(value) = lookup("ZONEPOOL_ASYNC_VERIFICATION") {
            self.async_verification = parse_bool(&value, self.async_verification);
        }

        if let Some(value) = lookup("ZONEPOOL_BACKENDS") {
            self.backends = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(value) = lookup("ZONEPOOL_CENTRAL_URL") {
            if !value.is_empty() {
                self.central_url = value;
            }
        }

        // A Redis URL switches the status store to the shared cache
        if let Some(url) = lookup("ZONEPOOL_REDIS_URL") {
            if !url.is_empty() {
                let ttl = self.status_store.ttl().as_secs();
                self.status_store = StatusStoreConfig::Redis {
                    url,
                    key_prefix: lookup("ZONEPOOL_REDIS_KEY_PREFIX")
                        .unwrap_or_else(default_redis_prefix),
                    ttl,
                };
            }
        }

        if let Some(value) = lookup("ZONEPOOL_HTTP_BIND_ADDR") {
            if value.eq_ignore_ascii_case("disabled") || value.is_empty() {
                self.http_bind_addr = None;
            } else {
                self.http_bind_addr = Some(value.parse().map_err(|_| {
                    ConfigError::InvalidValue {
                        field: "http_bind_addr",
                        value,
                    }
                })?);
            }
        }

        debug!("Applied environment overrides");
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_percentage > 100 {
            return Err(ConfigError::InvalidThreshold(self.threshold_percentage));
        }

        if self.poll_timeout == 0 {
            return Err(ConfigError::InvalidTimeout(
                "poll_timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll_timeout > 300 {
            return Err(ConfigError::InvalidTimeout(
                "poll_timeout too large (max 300 seconds)".to_string(),
            ));
        }

        if self.poll_max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_max_retries",
                value: "0".to_string(),
            });
        }

        if self.report_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "report_max_attempts",
                value: "0".to_string(),
            });
        }

        if self.max_zones_per_tick == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_zones_per_tick",
                value: "0".to_string(),
            });
        }

        if self.enable_recovery_timer && self.periodic_recovery_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "periodic_recovery_interval",
                value: "0".to_string(),
            });
        }

        if self.enable_sync_timer && self.periodic_sync_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "periodic_sync_interval",
                value: "0".to_string(),
            });
        }

        for key in &self.tsig_keys {
            TsigKey::from_base64(&key.name, &key.algorithm, &key.secret).map_err(|e| {
                ConfigError::InvalidTsigKey {
                    name: key.name.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        let key_names: HashSet<String> = self
            .tsig_keys
            .iter()
            .map(|k| normalize_key_name(&k.name))
            .collect();

        let mut pool_ids = HashSet::new();
        for pool in &self.pools {
            if !pool_ids.insert(pool.id.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.id.clone()));
            }

            if let Some(threshold) = pool.threshold_percentage {
                if threshold > 100 {
                    return Err(ConfigError::InvalidThreshold(threshold));
                }
            }

            for target in &pool.targets {
                let enabled = self.backends.iter().any(|b| *b == target.backend_type);
                if !enabled || !backend::is_supported(&target.backend_type) {
                    return Err(ConfigError::UnknownBackend(target.backend_type.clone()));
                }
            }

            for ns in pool.nameservers.iter().chain(pool.also_notifies.iter()) {
                if let Some(key) = &ns.tsig_key {
                    if !key_names.contains(&normalize_key_name(key)) {
                        return Err(ConfigError::UnknownTsigKey(key.clone()));
                    }
                }
            }
        }

        Ok(())
    }

    /// Decoded TSIG keys, indexed by normalised name
    pub fn tsig_key_map(&self) -> Result<HashMap<String, TsigKey>, ConfigError> {
        self.tsig_keys
            .iter()
            .map(|k| {
                TsigKey::from_base64(&k.name, &k.algorithm, &k.secret)
                    .map(|key| (normalize_key_name(&k.name), key))
                    .map_err(|e| ConfigError::InvalidTsigKey {
                        name: k.name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout)
    }

    pub fn poll_retry_interval(&self) -> Duration {
        Duration::from_secs(self.poll_retry_interval)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(self.poll_delay)
    }
}

pub(crate) fn normalize_key_name(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        })
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
threshold_percentage = 50
poll_timeout = 10
poll_max_retries = 3
all_tcp = true

[status_store]
kind = "sql"
url = "sqlite::memory:"

[[tsig_keys]]
name = "xfer-key."
secret = "c2VjcmV0LXNlY3JldC1zZWNyZXQtc2VjcmV0IQ=="

[[pools]]
id = "default"
name = "Default Pool"

[[pools.targets]]
type = "fake"
options = { label = "primary" }

[[pools.targets.masters]]
host = "192.0.2.1"
port = 5354

[[pools.nameservers]]
host = "192.0.2.10"

[[pools.nameservers]]
host = "192.0.2.11"
port = 5300
tsig_key = "XFER-KEY"
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold_percentage, 100);
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_toml() {
        let config = PoolManagerConfig::from_toml(SAMPLE).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.threshold_percentage, 50);
        assert_eq!(config.poll_max_retries, 3);
        assert!(config.all_tcp);
        // untouched fields keep their defaults
        assert_eq!(config.poll_retry_interval, 15);
        assert!(matches!(config.status_store, StatusStoreConfig::Sql { ttl: 3600, .. }));

        let pool = &config.pools[0];
        assert_eq!(pool.targets[0].backend_type, "fake");
        assert_eq!(pool.targets[0].masters[0].port, 5354);
        assert_eq!(pool.nameservers[0].port, 53);
        assert_eq!(pool.nameservers[1].tsig_key.as_deref(), Some("XFER-KEY"));

        let keys = config.tsig_key_map().unwrap();
        assert!(keys.contains_key("xfer-key"));
    }

    #[test]
    fn test_invalid_threshold() {
        let config = PoolManagerConfig {
            threshold_percentage: 101,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(101)));
    }

    #[test]
    fn test_invalid_timeout() {
        let config = PoolManagerConfig {
            poll_timeout: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_backend_is_rejected() {
        let mut config = PoolManagerConfig::from_toml(SAMPLE).unwrap();
        config.backends = vec!["bind9".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownBackend("fake".to_string()))
        );
    }

    #[test]
    fn test_unknown_tsig_key_is_rejected() {
        let mut config = PoolManagerConfig::from_toml(SAMPLE).unwrap();
        config.tsig_keys.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownTsigKey(_))
        ));
    }

    #[test]
    fn test_duplicate_pool_is_rejected() {
        let mut config = PoolManagerConfig::from_toml(SAMPLE).unwrap();
        let pool = config.pools[0].clone();
        config.pools.push(pool);
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicatePool("default".to_string()))
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ZONEPOOL_THRESHOLD_PERCENTAGE", "75"),
            ("ZONEPOOL_ALL_TCP", "yes"),
            ("ZONEPOOL_REDIS_URL", "redis://cache:6379"),
            ("ZONEPOOL_HTTP_BIND_ADDR", "disabled"),
        ]
        .into_iter()
        .collect();

        let mut config = PoolManagerConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.threshold_percentage, 75);
        assert!(config.all_tcp);
        assert!(config.http_bind_addr.is_none());
        assert_eq!(
            config.status_store,
            StatusStoreConfig::Redis {
                url: "redis://cache:6379".to_string(),
                key_prefix: "zonepool:status".to_string(),
                ttl: 3600,
            }
        );
    }

    #[test]
    fn test_env_rejects_garbage_numbers() {
        let mut config = PoolManagerConfig::default();
        let result = config.apply_env(|k| {
            (k == "ZONEPOOL_POLL_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "poll_timeout", .. })
        ));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("ON", false));
        assert!(!parse_bool("no", true));
        assert!(parse_bool("invalid", true));
        assert!(!parse_bool("invalid", false));
    }
}
