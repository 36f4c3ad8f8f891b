//! DNS wire client used for propagation checks.
//!
//! Only three exchanges are needed: NOTIFY, a non-recursive SOA query and a
//! full zone transfer. Wire-level problems are never errors here; every
//! exchange ends in an [`Outcome`] the caller can act on.

use super::DNSPacket;
use super::enums::{DNSResourceType, ResponseCode};
use super::resource::DNSResource;
use super::tsig::TsigKey;
use crate::config::{PoolManagerConfig, normalize_key_name};
use crate::error::{ConfigError, PoolManagerError, Result};
use crate::pool::Nameserver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

/// Largest UDP response we accept
const MAX_UDP_RESPONSE: usize = 4096;

/// Classification of one DNS exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// NOERROR with the authoritative flag set
    Ok,
    /// NXDOMAIN, REFUSED or SERVFAIL: the server does not have the zone
    NoDomain(ResponseCode),
    /// NOERROR without the authoritative flag
    NotAuthoritative,
    /// Any other rcode
    Rejected(u8),
    /// No response within the timeout
    Timeout,
    /// Unparseable response, or one that does not answer the request
    Malformed,
    /// Transient socket error (EAGAIN class); retried like a timeout
    SocketRetry,
    /// Connection refused and other hard socket errors; never retried
    SocketFatal,
}

impl Outcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::Timeout | Outcome::SocketRetry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::NoDomain(_) => "no-domain",
            Outcome::NotAuthoritative => "not-authoritative",
            Outcome::Rejected(_) => "rejected",
            Outcome::Timeout => "timeout",
            Outcome::Malformed => "malformed",
            Outcome::SocketRetry => "socket-retry",
            Outcome::SocketFatal => "socket-fatal",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoDomain(rcode) => write!(f, "no-domain ({:?})", rcode),
            Outcome::Rejected(rcode) => write!(f, "rejected (rcode {})", rcode),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Timeout and retry budget for one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub retry_interval: Duration,
    /// Total attempts, including the first (0 is treated as 1)
    pub max_retries: u32,
}

impl ProbeOptions {
    pub fn from_config(config: &PoolManagerConfig) -> Self {
        Self {
            timeout: config.poll_timeout(),
            retry_interval: config.poll_retry_interval(),
            max_retries: config.poll_max_retries,
        }
    }
}

/// Result of a NOTIFY or SOA probe after retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub outcome: Outcome,
    /// Serial from the SOA answer; always `None` for NOTIFY
    pub serial: Option<u32>,
    /// Number of messages sent
    pub attempts: u32,
}

#[async_trait]
pub trait WireClient: Send + Sync {
    /// Announce a change of `zone_name` to `nameserver`
    async fn send_notify(
        &self,
        zone_name: &str,
        nameserver: &Nameserver,
        options: &ProbeOptions,
    ) -> Probe;

    /// Ask `nameserver` for the SOA serial of `zone_name`
    async fn query_serial(
        &self,
        zone_name: &str,
        nameserver: &Nameserver,
        options: &ProbeOptions,
    ) -> Probe;
}

/// UDP/TCP implementation of [`WireClient`]
#[derive(Debug, Clone, Default)]
pub struct DnsWireClient {
    all_tcp: bool,
    keys: HashMap<Nameserver, TsigKey>,
}

impl DnsWireClient {
    pub fn new(all_tcp: bool) -> Self {
        Self {
            all_tcp,
            keys: HashMap::new(),
        }
    }

    /// Sign every message sent to `nameserver` with `key`
    pub fn with_tsig_key(mut self, nameserver: Nameserver, key: TsigKey) -> Self {
        self.keys.insert(nameserver, key);
        self
    }

    /// Build a client with the TSIG keys referenced by the configured pools
    pub fn from_config(config: &PoolManagerConfig) -> std::result::Result<Self, ConfigError> {
        let keys = config.tsig_key_map()?;
        let mut client = Self::new(config.all_tcp);

        let servers = config.pools.iter().flat_map(|p| {
            p.nameservers
                .iter()
                .chain(p.also_notifies.iter())
                .chain(p.targets.iter().flat_map(|t| t.masters.iter()))
        });
        for server in servers {
            if let Some(name) = &server.tsig_key {
                let key = keys
                    .get(&normalize_key_name(name))
                    .ok_or_else(|| ConfigError::UnknownTsigKey(name.clone()))?;
                client = client.with_tsig_key(Nameserver::from(server), key.clone());
            }
        }

        debug!(
            "DNS wire client ready (all_tcp: {}, {} signed servers)",
            client.all_tcp,
            client.keys.len()
        );
        Ok(client)
    }

    fn encode(&self, request: &DNSPacket, nameserver: &Nameserver) -> Option<Vec<u8>> {
        let encoded = match self.keys.get(nameserver) {
            Some(key) => key.sign(request).map_err(|e| e.to_string()),
            None => request.serialize().map_err(|e| e.to_string()),
        };
        match encoded {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Failed to encode request for {}: {}", nameserver, e);
                None
            }
        }
    }

    async fn resolve(nameserver: &Nameserver) -> io::Result<SocketAddr> {
        lookup_host((nameserver.host.as_str(), nameserver.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {}", nameserver.host),
                )
            })
    }

    /// One send/receive with no retries
    async fn exchange(
        &self,
        request: &DNSPacket,
        nameserver: &Nameserver,
        wait: Duration,
    ) -> (Outcome, Option<DNSPacket>) {
        let Some(bytes) = self.encode(request, nameserver) else {
            return (Outcome::Malformed, None);
        };

        let exchange = async {
            let addr = Self::resolve(nameserver).await?;
            if self.all_tcp {
                return send_tcp(addr, &bytes).await;
            }
            let response = send_udp(addr, &bytes, request.header.id).await?;
            // Fall back to TCP when the answer did not fit
            if response.len() > 2 && response[2] & 0x02 != 0 {
                debug!("UDP response from {} truncated, retrying over TCP", addr);
                return send_tcp(addr, &bytes).await;
            }
            Ok(response)
        };

        let raw = match timeout(wait, exchange).await {
            Err(_) => return (Outcome::Timeout, None),
            Ok(Err(e)) => {
                let outcome = classify_io_error(&e);
                debug!("Socket error talking to {}: {} ({})", nameserver, e, outcome);
                return (outcome, None);
            }
            Ok(Ok(raw)) => raw,
        };

        trace!("Received {} bytes from {}", raw.len(), nameserver);
        match DNSPacket::parse(&raw) {
            Ok(response) => (classify_response(request, &response), Some(response)),
            Err(e) => {
                warn!("Malformed response from {}: {}", nameserver, e);
                (Outcome::Malformed, None)
            }
        }
    }

    /// Send `request` until a non-retryable outcome or the budget runs out
    async fn exchange_with_retries(
        &self,
        request: &DNSPacket,
        nameserver: &Nameserver,
        options: &ProbeOptions,
    ) -> (Outcome, Option<DNSPacket>, u32) {
        let budget = options.max_retries.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (outcome, response) = self.exchange(request, nameserver, options.timeout).await;
            if !outcome.is_retryable() || attempts >= budget {
                return (outcome, response, attempts);
            }
            debug!(
                "Attempt {}/{} to {} ended with {}, retrying in {:?}",
                attempts, budget, nameserver, outcome, options.retry_interval
            );
            sleep(options.retry_interval).await;
        }
    }

    /// Full zone transfer over TCP. Returns every record between the opening
    /// and closing SOA, the opening SOA included.
    pub async fn transfer_zone(
        &self,
        zone_name: &str,
        nameserver: &Nameserver,
        wait: Duration,
    ) -> Result<Vec<DNSResource>> {
        let request = DNSPacket::axfr_query(zone_name);
        let bytes = self
            .encode(&request, nameserver)
            .ok_or_else(|| PoolManagerError::Parse("could not encode AXFR request".to_string()))?;

        let addr = timeout(wait, Self::resolve(nameserver))
            .await
            .map_err(|_| PoolManagerError::Timeout)??;
        let mut stream = timeout(wait, TcpStream::connect(addr))
            .await
            .map_err(|_| PoolManagerError::Timeout)??;

        stream
            .write_all(&(bytes.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;

        let mut records = Vec::new();
        let mut soa_seen = 0;
        while soa_seen < 2 {
            let raw = timeout(wait, read_tcp_message(&mut stream))
                .await
                .map_err(|_| PoolManagerError::Timeout)??;
            let message = DNSPacket::parse(&raw)?;

            if !message.answers_request(&request) {
                return Err(PoolManagerError::Parse(
                    "AXFR message does not match request".to_string(),
                ));
            }
            match message.response_code() {
                Some(ResponseCode::NoError) => {}
                other => {
                    return Err(PoolManagerError::Parse(format!(
                        "AXFR of {} refused by {}: {:?}",
                        zone_name, nameserver, other
                    )));
                }
            }
            if message.answers.is_empty() {
                return Err(PoolManagerError::Parse("empty AXFR message".to_string()));
            }

            for record in message.answers {
                if record.rtype == DNSResourceType::SOA {
                    soa_seen += 1;
                    if soa_seen == 2 {
                        break;
                    }
                } else if soa_seen == 0 {
                    return Err(PoolManagerError::Parse(
                        "AXFR did not start with SOA".to_string(),
                    ));
                }
                records.push(record);
            }
        }

        debug!(
            "Transferred {} records of {} from {}",
            records.len(),
            zone_name,
            nameserver
        );
        Ok(records)
    }
}

#[async_trait]
impl WireClient for DnsWireClient {
    async fn send_notify(
        &self,
        zone_name: &str,
        nameserver: &Nameserver,
        options: &ProbeOptions,
    ) -> Probe {
        let request = DNSPacket::notify(zone_name);
        let (outcome, _, attempts) = self
            .exchange_with_retries(&request, nameserver, options)
            .await;
        debug!(
            "NOTIFY {} to {}: {} after {} attempt(s)",
            zone_name, nameserver, outcome, attempts
        );
        Probe {
            outcome,
            serial: None,
            attempts,
        }
    }

    async fn query_serial(
        &self,
        zone_name: &str,
        nameserver: &Nameserver,
        options: &ProbeOptions,
    ) -> Probe {
        let request = DNSPacket::soa_query(zone_name);
        let (mut outcome, response, attempts) = self
            .exchange_with_retries(&request, nameserver, options)
            .await;

        let mut serial = None;
        if outcome == Outcome::Ok {
            serial = response.and_then(|r| r.soa_serial_for(zone_name));
            if serial.is_none() {
                warn!("{} answered without an SOA for {}", nameserver, zone_name);
                outcome = Outcome::Malformed;
            }
        }

        debug!(
            "SOA {} from {}: {} serial={:?} after {} attempt(s)",
            zone_name, nameserver, outcome, serial, attempts
        );
        Probe {
            outcome,
            serial,
            attempts,
        }
    }
}

fn classify_io_error(error: &io::Error) -> Outcome {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
            Outcome::SocketRetry
        }
        _ => Outcome::SocketFatal,
    }
}

fn classify_response(request: &DNSPacket, response: &DNSPacket) -> Outcome {
    if !response.answers_request(request) {
        return Outcome::Malformed;
    }
    match response.response_code() {
        Some(ResponseCode::NoError) if response.header.aa => Outcome::Ok,
        Some(ResponseCode::NoError) => Outcome::NotAuthoritative,
        Some(rcode) if rcode.means_no_zone() => Outcome::NoDomain(rcode),
        _ => Outcome::Rejected(response.header.rcode),
    }
}

async fn send_udp(addr: SocketAddr, bytes: &[u8], id: u16) -> io::Result<Vec<u8>> {
    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    socket.send(bytes).await?;

    let mut buf = vec![0u8; MAX_UDP_RESPONSE];
    loop {
        let len = socket.recv(&mut buf).await?;
        if len >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == id {
            return Ok(buf[..len].to_vec());
        }
        trace!("Ignoring stray datagram from {} ({} bytes)", addr, len);
    }
}

async fn send_tcp(addr: SocketAddr, bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&(bytes.len() as u16).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    read_tcp_message(&mut stream).await
}

async fn read_tcp_message(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut length_buf = [0u8; 2];
    stream.read_exact(&mut length_buf).await?;
    let mut message = vec![0u8; u16::from_be_bytes(length_buf) as usize];
    stream.read_exact(&mut message).await?;
    Ok(message)
}
