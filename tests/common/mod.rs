//! Common test utilities for the pool manager integration tests

#![allow(dead_code)] // Each test binary uses a different subset

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use zonepool::{
    backend::{Backends, fake::FakeBackend},
    central::memory::MemoryCentralStore,
    dns::{
        DNSPacket,
        client::{Outcome, Probe, ProbeOptions, WireClient},
        common::name_to_labels,
        resource::{DNSResource, SoaData},
    },
    manager::{EngineSettings, PoolManager},
    metrics::PoolManagerMetrics,
    model::{Zone, ZoneAction},
    pool::{Nameserver, Pool, PoolTarget, PoolTopology},
    status::{StatusStore, memory::MemoryStatusStore},
};

pub const POOL_ID: &str = "default";

/// What a scripted nameserver answers to an SOA query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Serial(u32),
    Outcome(Outcome),
}

/// Wire client that answers from per-nameserver scripts instead of the network.
///
/// Queued answers are used first; after that the steady answer set with
/// `serve` repeats. With neither, queries time out.
#[derive(Default)]
pub struct ScriptedWireClient {
    queued: Mutex<HashMap<Nameserver, VecDeque<Answer>>>,
    steady: Mutex<HashMap<Nameserver, Answer>>,
    notifies: Mutex<HashMap<Nameserver, u32>>,
    queries: Mutex<HashMap<Nameserver, u32>>,
}

impl ScriptedWireClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, nameserver: &Nameserver, answer: Answer) {
        self.steady.lock().insert(nameserver.clone(), answer);
    }

    pub fn serve_all(&self, nameservers: &[Nameserver], answer: Answer) {
        for nameserver in nameservers {
            self.serve(nameserver, answer);
        }
    }

    pub fn script(&self, nameserver: &Nameserver, answers: impl IntoIterator<Item = Answer>) {
        self.queued
            .lock()
            .entry(nameserver.clone())
            .or_default()
            .extend(answers);
    }

    pub fn notify_count(&self, nameserver: &Nameserver) -> u32 {
        self.notifies.lock().get(nameserver).copied().unwrap_or(0)
    }

    pub fn query_count(&self, nameserver: &Nameserver) -> u32 {
        self.queries.lock().get(nameserver).copied().unwrap_or(0)
    }

    pub fn total_queries(&self) -> u32 {
        self.queries.lock().values().sum()
    }

    fn next_answer(&self, nameserver: &Nameserver) -> Answer {
        if let Some(answer) = self
            .queued
            .lock()
            .get_mut(nameserver)
            .and_then(|q| q.pop_front())
        {
            return answer;
        }
        self.steady
            .lock()
            .get(nameserver)
            .copied()
            .unwrap_or(Answer::Outcome(Outcome::Timeout))
    }
}

#[async_trait]
impl WireClient for ScriptedWireClient {
    async fn send_notify(
        &self,
        _zone_name: &str,
        nameserver: &Nameserver,
        _options: &ProbeOptions,
    ) -> Probe {
        *self.notifies.lock().entry(nameserver.clone()).or_default() += 1;
        Probe {
            outcome: Outcome::Ok,
            serial: None,
            attempts: 1,
        }
    }

    async fn query_serial(
        &self,
        _zone_name: &str,
        nameserver: &Nameserver,
        options: &ProbeOptions,
    ) -> Probe {
        *self.queries.lock().entry(nameserver.clone()).or_default() += 1;
        match self.next_answer(nameserver) {
            Answer::Serial(serial) => Probe {
                outcome: Outcome::Ok,
                serial: Some(serial),
                attempts: 1,
            },
            // a retryable outcome means the real client spent the whole budget
            Answer::Outcome(outcome) if outcome.is_retryable() => Probe {
                outcome,
                serial: None,
                attempts: options.max_retries.max(1),
            },
            Answer::Outcome(outcome) => Probe {
                outcome,
                serial: None,
                attempts: 1,
            },
        }
    }
}

pub fn nameservers(count: usize) -> Vec<Nameserver> {
    (0..count)
        .map(|i| Nameserver::new(format!("ns{}.example.net", i + 1), 53))
        .collect()
}

/// Settings with no delays, so tests finish in milliseconds
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        probe: ProbeOptions {
            timeout: Duration::from_millis(50),
            retry_interval: Duration::from_millis(1),
            max_retries: 3,
        },
        poll_delay: Duration::ZERO,
        async_verification: false,
        report_max_attempts: 3,
        report_retry_base: Duration::from_millis(1),
    }
}

/// An engine wired to in-memory fakes
pub struct Harness {
    pub manager: PoolManager,
    pub central: Arc<MemoryCentralStore>,
    pub status: Arc<MemoryStatusStore>,
    pub wire: Arc<ScriptedWireClient>,
    pub backends: Vec<Arc<FakeBackend>>,
    pub pool: Pool,
}

pub struct HarnessBuilder {
    nameservers: usize,
    also_notifies: usize,
    targets: usize,
    threshold: u8,
    settings: EngineSettings,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            nameservers: 2,
            also_notifies: 0,
            targets: 1,
            threshold: 100,
            settings: fast_settings(),
        }
    }
}

impl HarnessBuilder {
    pub fn nameservers(mut self, count: usize) -> Self {
        self.nameservers = count;
        self
    }

    pub fn also_notifies(mut self, count: usize) -> Self {
        self.also_notifies = count;
        self
    }

    pub fn targets(mut self, count: usize) -> Self {
        self.targets = count;
        self
    }

    pub fn threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Harness {
        let targets: Vec<PoolTarget> = (0..self.targets)
            .map(|i| PoolTarget {
                id: format!("{}-{}-fake", POOL_ID, i),
                backend_type: "fake".to_string(),
                masters: vec![Nameserver::new("127.0.0.1", 5354)],
                options: HashMap::new(),
            })
            .collect();
        let also_notifies = (0..self.also_notifies)
            .map(|i| Nameserver::new(format!("notify{}.example.net", i + 1), 53))
            .collect();

        let pool = Pool {
            id: POOL_ID.to_string(),
            name: POOL_ID.to_string(),
            targets: targets.clone(),
            nameservers: nameservers(self.nameservers),
            also_notifies,
            threshold_percentage: self.threshold,
        };

        let mut backends = Backends::new();
        let mut fakes = Vec::new();
        for target in &targets {
            let fake = Arc::new(FakeBackend::new());
            backends.insert(&target.id, fake.clone());
            fakes.push(fake);
        }

        let central = Arc::new(MemoryCentralStore::new());
        let status = Arc::new(MemoryStatusStore::new(Duration::from_secs(3600)));
        let wire = Arc::new(ScriptedWireClient::new());
        let metrics = Arc::new(PoolManagerMetrics::new().expect("metrics registry"));

        let manager = PoolManager::new(
            Arc::new(PoolTopology::from_pools([pool.clone()])),
            backends,
            wire.clone(),
            status.clone(),
            central.clone(),
            self.settings,
            metrics,
        );

        Harness {
            manager,
            central,
            status,
            wire,
            backends: fakes,
            pool,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Register a zone with the central store and return it
    pub fn zone(&self, name: &str, serial: u32, action: ZoneAction) -> Zone {
        let mut zone = Zone::new(name, serial, POOL_ID);
        zone.action = action;
        self.central.insert_zone(zone.clone());
        zone
    }

    pub async fn status_rows(&self, zone: &Zone, action: ZoneAction) -> usize {
        self.status
            .retrieve(&zone.id, action)
            .await
            .expect("retrieve status rows")
            .len()
    }
}

pub fn soa_record(zone: &str, serial: u32) -> DNSResource {
    DNSResource::soa(
        name_to_labels(zone),
        3600,
        SoaData {
            mname: name_to_labels("ns1.example.net"),
            rname: name_to_labels("hostmaster.example.net"),
            serial,
            refresh: 3600,
            retry: 600,
            expire: 86400,
            minimum: 300,
        },
    )
}

/// UDP responder on an ephemeral loopback port. `handler` returning `None`
/// leaves the query unanswered.
pub async fn spawn_udp_responder<F>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(&DNSPacket) -> Option<DNSPacket> + Send + Sync + 'static,
{
    spawn_udp_responder_at("127.0.0.1:0", handler).await
}

pub async fn spawn_udp_responder_at<F>(bind: &str, handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(&DNSPacket) -> Option<DNSPacket> + Send + Sync + 'static,
{
    let socket = UdpSocket::bind(bind).await.expect("bind udp");
    let addr = socket.local_addr().expect("udp addr");
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = DNSPacket::parse(&buf[..len]) else {
                continue;
            };
            if let Some(response) = handler(&request) {
                if let Ok(bytes) = response.serialize() {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        }
    });
    (addr, handle)
}

/// TCP responder; each request may be answered with several messages
pub async fn spawn_tcp_responder<F>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(&DNSPacket) -> Vec<DNSPacket> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind tcp");
    let addr = listener.local_addr().expect("tcp addr");
    let handler = Arc::new(handler);
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let mut len = [0u8; 2];
                if stream.read_exact(&mut len).await.is_err() {
                    return;
                }
                let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
                if stream.read_exact(&mut buf).await.is_err() {
                    return;
                }
                let Ok(request) = DNSPacket::parse(&buf) else {
                    return;
                };
                for response in handler(&request) {
                    let Ok(bytes) = response.serialize() else {
                        return;
                    };
                    let _ = stream.write_all(&(bytes.len() as u16).to_be_bytes()).await;
                    let _ = stream.write_all(&bytes).await;
                }
                let _ = stream.flush().await;
            });
        }
    });
    (addr, handle)
}

pub fn loopback(addr: SocketAddr) -> Nameserver {
    Nameserver::new("127.0.0.1", addr.port())
}
