//! BIND9 driver, talking to a bindcar-style HTTP sidecar.
//!
//! Zones are added as secondaries of the target's masters, so an update is a
//! retransfer request rather than a content push. Serials are read back over
//! DNS from the server itself.
//!
//! Options: `api_url` (required), `api_token`, `host`/`port` of the DNS
//! listener (defaults to the API host and 53), `timeout` in seconds.

use super::{Backend, DEFAULT_HTTP_TIMEOUT, duration_option, required_option};
use crate::dns::client::{Outcome, ProbeOptions, WireClient};
use crate::error::{PoolManagerError, Result};
use crate::model::{Context, Zone};
use crate::pool::{Nameserver, PoolTarget};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKEND_TYPE: &str = "bind9";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateZoneRequest<'a> {
    zone_name: &'a str,
    zone_type: &'static str,
    zone_config: SecondaryZoneConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecondaryZoneConfig {
    primaries: Vec<String>,
}

pub struct Bind9Backend {
    http: Client,
    api_url: String,
    api_token: Option<String>,
    masters: Vec<Nameserver>,
    dns_server: Nameserver,
    wire: Arc<dyn WireClient>,
    probe: ProbeOptions,
}

impl Bind9Backend {
    pub fn build(target: &PoolTarget, wire: Arc<dyn WireClient>) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(Self::from_target(target, wire)?))
    }

    pub fn from_target(target: &PoolTarget, wire: Arc<dyn WireClient>) -> Result<Self> {
        let api_url = build_api_url(required_option(target, "api_url")?);
        let timeout = duration_option(target, "timeout", DEFAULT_HTTP_TIMEOUT)?;

        let host = match target.option("host") {
            Some(host) => host.to_string(),
            None => reqwest::Url::parse(&api_url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .ok_or_else(|| {
                    PoolManagerError::backend(BACKEND_TYPE, "cannot derive DNS host from api_url")
                })?,
        };
        let port = match target.option("port") {
            Some(port) => port.parse().map_err(|_| {
                PoolManagerError::backend(BACKEND_TYPE, format!("invalid port: {}", port))
            })?,
            None => 53,
        };

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PoolManagerError::backend(BACKEND_TYPE, e))?;

        Ok(Self {
            http,
            api_url,
            api_token: target.option("api_token").map(|s| s.to_string()),
            masters: target.masters.clone(),
            dns_server: Nameserver::new(host, port),
            wire,
            probe: ProbeOptions {
                timeout,
                retry_interval: Duration::from_secs(1),
                max_retries: 1,
            },
        })
    }

    async fn request<T: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: Option<&T>,
    ) -> Result<StatusCode> {
        debug!(method = %method, url = %url, "HTTP request to bind9 sidecar");

        let mut request = self.http.request(method.clone(), url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PoolManagerError::backend(BACKEND_TYPE, e))?;
        let status = response.status();

        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            return Ok(status);
        }

        let text = response.text().await.unwrap_or_default();
        warn!(method = %method, url = %url, status = %status, "bind9 sidecar request failed");
        Err(PoolManagerError::backend(
            BACKEND_TYPE,
            format!("{} {} failed with {}: {}", method, url, status, text),
        ))
    }

    async fn retransfer(&self, zone_name: &str) -> Result<()> {
        let url = format!("{}/api/v1/zones/{}/retransfer", self.api_url, zone_name);
        match self.request(Method::POST, &url, None::<&()>).await? {
            StatusCode::NOT_FOUND => Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("zone {} is not configured", zone_name),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for Bind9Backend {
    fn backend_type(&self) -> &'static str {
        BACKEND_TYPE
    }

    async fn create_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        let zone_name = api_zone_name(&zone.name);
        let request = CreateZoneRequest {
            zone_name,
            zone_type: "secondary",
            zone_config: SecondaryZoneConfig {
                primaries: self.masters.iter().map(bind_primary).collect(),
            },
        };

        let url = format!("{}/api/v1/zones", self.api_url);
        match self.request(Method::POST, &url, Some(&request)).await? {
            StatusCode::CONFLICT => {
                info!("Zone {} already exists on {}, requesting retransfer", zone_name, self.api_url);
                self.retransfer(zone_name).await
            }
            StatusCode::NOT_FOUND => Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("zone API not found at {}", url),
            )),
            _ => {
                info!("Added secondary zone {} on {}", zone_name, self.api_url);
                Ok(())
            }
        }
    }

    async fn update_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        self.retransfer(api_zone_name(&zone.name)).await
    }

    async fn delete_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        let zone_name = api_zone_name(&zone.name);
        let url = format!("{}/api/v1/zones/{}", self.api_url, zone_name);
        if self.request(Method::DELETE, &url, None::<&()>).await? == StatusCode::NOT_FOUND {
            debug!("Zone {} already deleted from {}", zone_name, self.api_url);
        }
        Ok(())
    }

    async fn find_zone_serial(&self, zone_name: &str) -> Result<Option<u32>> {
        let probe = self
            .wire
            .query_serial(zone_name, &self.dns_server, &self.probe)
            .await;
        match probe.outcome {
            Outcome::Ok => Ok(probe.serial),
            Outcome::NoDomain(_) => Ok(None),
            other => Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("SOA query to {} failed: {}", self.dns_server, other),
            )),
        }
    }
}

fn build_api_url(server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        server.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", server.trim_end_matches('/'))
    }
}

fn api_zone_name(name: &str) -> &str {
    name.trim_end_matches('.')
}

/// A master as written in a BIND `primaries` clause
fn bind_primary(master: &Nameserver) -> String {
    if master.port == 53 {
        master.host.clone()
    } else {
        format!("{} port {}", master.host, master.port)
    }
}
