//! Configuration file through to a consensus in the SQL central store, with
//! nameservers answering on loopback sockets.

mod common;

use common::{soa_record, spawn_udp_responder};
use std::io::Write;
use std::sync::Arc;
use zonepool::backend::Backends;
use zonepool::central::CentralStore;
use zonepool::central::sql::SqlCentralStore;
use zonepool::config::PoolManagerConfig;
use zonepool::dns::client::DnsWireClient;
use zonepool::dns::enums::ResponseCode;
use zonepool::manager::{EngineSettings, PoolManager, PropagationState};
use zonepool::metrics::PoolManagerMetrics;
use zonepool::model::{Context, Status, Zone, ZoneAction, ZoneCriterion, ZoneStatus};
use zonepool::pool::PoolTopology;
use zonepool::status;

const SECRET: &str = "c2VjcmV0LWtleS1ieXRlcw==";

fn write_config(dir: &tempfile::TempDir, ns_ports: &[u16]) -> std::path::PathBuf {
    let nameservers: String = ns_ports
        .iter()
        .map(|port| format!("[[pools.nameservers]]\nhost = \"127.0.0.1\"\nport = {port}\ntsig_key = \"xfer\"\n\n"))
        .collect();
    let content = format!(
        r#"
threshold_percentage = 100
poll_timeout = 1
poll_retry_interval = 1
poll_max_retries = 2
poll_delay = 0
central_url = "sqlite://{db}"

[status_store]
kind = "memory"
ttl = 60

[[tsig_keys]]
name = "xfer"
secret = "{SECRET}"

[[pools]]
id = "default"

[[pools.targets]]
type = "fake"
masters = [{{ host = "127.0.0.1", port = 5354 }}]

{nameservers}"#,
        db = dir.path().join("central.db").display(),
    );

    let path = dir.path().join("zonepool.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

async fn build(config: &PoolManagerConfig) -> (PoolManager, Arc<SqlCentralStore>) {
    let topology = Arc::new(PoolTopology::from_config(config));
    let wire = Arc::new(DnsWireClient::from_config(config).unwrap());
    let backends = Backends::from_topology(&topology, wire.clone()).unwrap();
    let status_store = status::connect(&config.status_store).await.unwrap();
    let central = Arc::new(SqlCentralStore::connect(&config.central_url).await.unwrap());

    let manager = PoolManager::new(
        topology,
        backends,
        wire,
        status_store,
        central.clone(),
        EngineSettings::from_config(config),
        Arc::new(PoolManagerMetrics::new().unwrap()),
    );
    (manager, central)
}

#[tokio::test]
async fn test_create_then_delete_over_the_wire() {
    let (ns1, _a) = spawn_udp_responder(|req| {
        let mut response = req.response(ResponseCode::NoError, true);
        response.answers.push(soa_record("example.org.", 2025010101));
        Some(response)
    })
    .await;
    let (ns2, _b) = spawn_udp_responder(|req| {
        let mut response = req.response(ResponseCode::NoError, true);
        response.answers.push(soa_record("example.org.", 2025010102));
        Some(response)
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, &[ns1.port(), ns2.port()]);
    let config = PoolManagerConfig::from_file(&path).unwrap();
    config.validate().unwrap();

    let (manager, central) = build(&config).await;
    let ctx = Context::admin();
    let zone = Zone::new("example.org", 2025010101, "default");
    central.create_zone(&ctx, &zone).await.unwrap();

    let state = manager.create_zone(&ctx, &zone).await.unwrap();
    assert_eq!(state, PropagationState::ConsensusReached(Status::Success));

    let stored = central
        .find_zone(&ctx, &ZoneCriterion::by_name("example.org."))
        .await
        .unwrap();
    assert_eq!(stored.status, ZoneStatus::Active);
    assert_eq!(stored.action, ZoneAction::None);
    // both servers hold at least the expected serial; the older one is reported
    assert_eq!(stored.serial, 2025010101);

    let serials = manager.target_serials("default", "example.org.").await.unwrap();
    assert_eq!(serials[0].serial, Ok(Some(2025010101)));
}

#[tokio::test]
async fn test_delete_purges_zone_once_servers_drop_it() {
    let (ns1, _a) =
        spawn_udp_responder(|req| Some(req.response(ResponseCode::NameError, true))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, &[ns1.port()]);
    let config = PoolManagerConfig::from_file(&path).unwrap();
    let (manager, central) = build(&config).await;

    let ctx = Context::admin();
    let mut zone = Zone::new("gone.example.org", 4, "default");
    zone.action = ZoneAction::Delete;
    central.create_zone(&ctx, &zone).await.unwrap();

    let state = manager.delete_zone(&ctx, &zone).await.unwrap();
    assert_eq!(state, PropagationState::ConsensusReached(Status::Success));

    let lookup = central
        .find_zone(&ctx, &ZoneCriterion::by_name("gone.example.org."))
        .await;
    assert!(lookup.is_err());
}
