//! PowerDNS driver using the authoritative server's HTTP API.
//!
//! Zones are created with kind `Slave` pointing at the target's masters;
//! updates trigger `axfr-retrieve`.
//!
//! Options: `api_url` (e.g. `http://127.0.0.1:8081/api/v1`), `api_key`,
//! `server_id` (default `localhost`), `timeout` in seconds.

use super::{Backend, DEFAULT_HTTP_TIMEOUT, duration_option, required_option};
use crate::dns::client::WireClient;
use crate::error::{PoolManagerError, Result};
use crate::model::{Context, Zone};
use crate::pool::{Nameserver, PoolTarget};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BACKEND_TYPE: &str = "powerdns";

#[derive(Debug, Serialize)]
struct PdnsZoneCreate {
    name: String,
    kind: &'static str,
    masters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PdnsZone {
    serial: u32,
}

pub struct PowerDnsBackend {
    http: Client,
    base_url: String,
    api_key: String,
    server_id: String,
    masters: Vec<Nameserver>,
}

impl PowerDnsBackend {
    pub fn build(target: &PoolTarget, _wire: Arc<dyn WireClient>) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(Self::from_target(target)?))
    }

    pub fn from_target(target: &PoolTarget) -> Result<Self> {
        let timeout = duration_option(target, "timeout", DEFAULT_HTTP_TIMEOUT)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PoolManagerError::backend(BACKEND_TYPE, e))?;

        Ok(Self {
            http,
            base_url: required_option(target, "api_url")?
                .trim_end_matches('/')
                .to_string(),
            api_key: target.option("api_key").unwrap_or_default().to_string(),
            server_id: target.option("server_id").unwrap_or("localhost").to_string(),
            masters: target.masters.clone(),
        })
    }

    fn auth_header(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("X-API-Key", &self.api_key)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/servers/{}/{}",
            self.base_url,
            self.server_id,
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<StatusCode> {
        let response = self
            .auth_header(request)
            .send()
            .await
            .map_err(|e| PoolManagerError::backend(BACKEND_TYPE, e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            return Ok(status);
        }
        let text = response.text().await.unwrap_or_default();
        warn!("PowerDNS {} failed with {}: {}", what, status, text);
        Err(PoolManagerError::backend(
            BACKEND_TYPE,
            format!("{} failed with {}: {}", what, status, text),
        ))
    }

    async fn retrieve(&self, zone_name: &str) -> Result<()> {
        let url = self.url(&format!("zones/{}/axfr-retrieve", zone_name));
        match self.send(self.http.put(url), "axfr-retrieve").await? {
            StatusCode::NOT_FOUND => Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("zone {} does not exist", zone_name),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for PowerDnsBackend {
    fn backend_type(&self) -> &'static str {
        BACKEND_TYPE
    }

    async fn create_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        let body = PdnsZoneCreate {
            name: zone.name.clone(),
            kind: "Slave",
            masters: self.masters.iter().map(|m| m.to_string()).collect(),
        };
        let request = self.http.post(self.url("zones")).json(&body);
        match self.send(request, "create_zone").await? {
            StatusCode::CONFLICT => {
                info!("Zone {} already exists in PowerDNS, retrieving", zone.name);
                self.retrieve(&zone.name).await
            }
            StatusCode::NOT_FOUND => Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("server {} not found", self.server_id),
            )),
            _ => {
                info!("Created slave zone {} in PowerDNS", zone.name);
                Ok(())
            }
        }
    }

    async fn update_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        self.retrieve(&zone.name).await
    }

    async fn delete_zone(&self, _context: &Context, zone: &Zone) -> Result<()> {
        let url = self.url(&format!("zones/{}", zone.name));
        if self.send(self.http.delete(url), "delete_zone").await? == StatusCode::NOT_FOUND {
            debug!("Zone {} already absent from PowerDNS", zone.name);
        }
        Ok(())
    }

    async fn find_zone_serial(&self, zone_name: &str) -> Result<Option<u32>> {
        let url = self.url(&format!("zones/{}", zone_name));
        let response = self
            .auth_header(self.http.get(url))
            .send()
            .await
            .map_err(|e| PoolManagerError::backend(BACKEND_TYPE, e))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => Ok(None),
            status if status.is_success() => {
                let zone: PdnsZone = response
                    .json()
                    .await
                    .map_err(|e| PoolManagerError::backend(BACKEND_TYPE, e))?;
                Ok(Some(zone.serial))
            }
            status => Err(PoolManagerError::backend(
                BACKEND_TYPE,
                format!("get_zone failed with {}", status),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(options: &[(&str, &str)]) -> PoolTarget {
        PoolTarget {
            id: "default-1-powerdns".to_string(),
            backend_type: BACKEND_TYPE.to_string(),
            masters: vec![Nameserver::new("192.0.2.1", 5354)],
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_urls() {
        let backend =
            PowerDnsBackend::from_target(&target(&[("api_url", "http://127.0.0.1:8081/api/v1/")]))
                .unwrap();
        assert_eq!(
            backend.url("zones/example.com."),
            "http://127.0.0.1:8081/api/v1/servers/localhost/zones/example.com."
        );
    }

    #[test]
    fn test_create_body() {
        let body = PdnsZoneCreate {
            name: "example.com.".to_string(),
            kind: "Slave",
            masters: target(&[]).masters.iter().map(|m| m.to_string()).collect(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "Slave");
        assert_eq!(json["masters"], serde_json::json!(["192.0.2.1:5354"]));
    }

    #[test]
    fn test_requires_api_url() {
        assert!(PowerDnsBackend::from_target(&target(&[])).is_err());
    }
}
