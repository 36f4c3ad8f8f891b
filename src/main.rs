use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zonepool::{
    backend::Backends,
    central::{CentralStore, sql::SqlCentralStore},
    config::PoolManagerConfig,
    dns::{client::DnsWireClient, client::ProbeOptions, client::WireClient, enums::DNSResourceType},
    dns::common::labels_to_name,
    graceful_shutdown::GracefulShutdown,
    http_server::HttpServer,
    manager::{EngineSettings, PoolManager},
    metrics::PoolManagerMetrics,
    model::{Context, ZoneAction, ZoneCriterion},
    pool::{Nameserver, PoolTopology},
    reconciler::{Reconciler, ReconcilerSettings},
    status::{self, StatusStore},
};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Zone propagation manager for pools of authoritative nameservers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the manager: recovery/sync timers and the HTTP endpoint
    Run,
    /// Propagate one zone's pending action and wait for the result
    Propagate {
        /// Zone name
        zone: String,
        /// Override the action (create, update, delete)
        #[arg(long)]
        action: Option<ZoneAction>,
    },
    /// Send a NOTIFY for a zone to one nameserver
    Notify { zone: String, nameserver: String },
    /// Query the SOA serial a nameserver serves for a zone
    Serial { zone: String, nameserver: String },
    /// Ask every backend target of a pool for its serial
    TargetSerials { pool: String, zone: String },
    /// Compare a nameserver's AXFR with the records in the central store
    CheckDrift { zone: String, nameserver: String },
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_nameserver(value: &str) -> CliResult<Nameserver> {
    Nameserver::parse(value).ok_or_else(|| format!("invalid nameserver address: {value}").into())
}

struct Runtime {
    manager: PoolManager,
    central: Arc<SqlCentralStore>,
    wire: Arc<DnsWireClient>,
}

async fn build_runtime(config: &PoolManagerConfig) -> CliResult<Runtime> {
    let topology = Arc::new(PoolTopology::from_config(config));
    let wire = Arc::new(DnsWireClient::from_config(config)?);
    let backends = Backends::from_topology(&topology, wire.clone())?;
    let status_store = status::connect(&config.status_store).await?;
    let central = Arc::new(SqlCentralStore::connect(&config.central_url).await?);
    let metrics = Arc::new(PoolManagerMetrics::new()?);

    info!(
        "Loaded {} pools, {} backend targets, status store: {}",
        topology.len(),
        backends.len(),
        status_store.name()
    );

    let manager = PoolManager::new(
        topology,
        backends,
        wire.clone(),
        status_store,
        central.clone(),
        EngineSettings::from_config(config),
        metrics,
    );
    Ok(Runtime {
        manager,
        central,
        wire,
    })
}

async fn run(config: &PoolManagerConfig, runtime: Runtime) -> CliResult<()> {
    let shutdown = GracefulShutdown::default();

    let reconciler = Arc::new(Reconciler::new(
        runtime.manager.clone(),
        ReconcilerSettings::from_config(config),
    ));
    let timers = reconciler.spawn(&shutdown);
    info!("Started {} periodic timers", timers.len());

    let status_store = runtime.manager.status_store().clone();
    shutdown
        .register_component("status-store", move || {
            let status_store = status_store.clone();
            async move {
                status_store.close().await;
                Ok(())
            }
        })
        .await;
    let central = runtime.central.clone();
    shutdown
        .register_component("central-store", move || {
            let central = central.clone();
            async move {
                central.close().await;
                Ok(())
            }
        })
        .await;

    if let Some(bind_addr) = config.http_bind_addr {
        let server = HttpServer::new(runtime.manager.clone(), bind_addr);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server.start(shutdown_rx).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    shutdown.shutdown().await?;

    for timer in timers {
        if let Err(e) = timer.await {
            warn!("Timer task ended abnormally: {}", e);
        }
    }
    Ok(())
}

async fn propagate(runtime: Runtime, zone_name: &str, action: Option<ZoneAction>) -> CliResult<()> {
    let context = Context::admin();
    let mut zone = runtime
        .central
        .find_zone(&context, &ZoneCriterion::by_name(zone_name))
        .await?;
    if let Some(action) = action {
        zone.action = action;
    }

    let state = runtime.manager.propagate(&context, &zone).await?;
    println!("{} {}: {:?}", zone.name, zone.action, state);
    Ok(())
}

async fn check_drift(runtime: Runtime, zone_name: &str, nameserver: &Nameserver) -> CliResult<bool> {
    let context = Context::admin();
    let zone = runtime
        .central
        .find_zone(&context, &ZoneCriterion::by_name(zone_name))
        .await?;

    let expected: BTreeSet<(String, String)> = runtime
        .central
        .find_records(&context, &zone.id)
        .await?
        .into_iter()
        .filter(|r| !r.rtype.eq_ignore_ascii_case("SOA"))
        .map(|r| (normalize_owner(&r.name), r.rtype.to_ascii_uppercase()))
        .collect();

    let transferred = runtime
        .wire
        .transfer_zone(&zone.name, nameserver, Duration::from_secs(30))
        .await?;
    let served: BTreeSet<(String, String)> = transferred
        .iter()
        .filter(|r| r.rtype != DNSResourceType::SOA)
        .map(|r| (labels_to_name(&r.labels).to_ascii_lowercase(), r.rtype.to_string()))
        .collect();

    let missing: Vec<_> = expected.difference(&served).collect();
    let extra: Vec<_> = served.difference(&expected).collect();
    for (name, rtype) in &missing {
        println!("missing on {}: {} {}", nameserver, name, rtype);
    }
    for (name, rtype) in &extra {
        println!("unexpected on {}: {} {}", nameserver, name, rtype);
    }
    if missing.is_empty() && extra.is_empty() {
        println!("{} on {} matches the central store ({} rrsets)", zone.name, nameserver, served.len());
        return Ok(true);
    }
    Ok(false)
}

fn normalize_owner(name: &str) -> String {
    let mut owner = name.to_ascii_lowercase();
    if !owner.ends_with('.') {
        owner.push('.');
    }
    owner
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = PoolManagerConfig::load(cli.config.as_deref())?;
    let probe = ProbeOptions::from_config(&config);

    match cli.command {
        Command::Run => {
            let runtime = build_runtime(&config).await?;
            run(&config, runtime).await
        }
        Command::Propagate { zone, action } => {
            let runtime = build_runtime(&config).await?;
            propagate(runtime, &zone, action).await
        }
        Command::Notify { zone, nameserver } => {
            let nameserver = parse_nameserver(&nameserver)?;
            let wire = DnsWireClient::from_config(&config)?;
            let result = wire.send_notify(&zone, &nameserver, &probe).await;
            println!(
                "NOTIFY {} to {}: {} after {} attempts",
                zone, nameserver, result.outcome, result.attempts
            );
            Ok(())
        }
        Command::Serial { zone, nameserver } => {
            let nameserver = parse_nameserver(&nameserver)?;
            let wire = DnsWireClient::from_config(&config)?;
            let result = wire.query_serial(&zone, &nameserver, &probe).await;
            match result.serial {
                Some(serial) => println!("{} on {}: serial {}", zone, nameserver, serial),
                None => println!("{} on {}: {}", zone, nameserver, result.outcome),
            }
            Ok(())
        }
        Command::TargetSerials { pool, zone } => {
            let runtime = build_runtime(&config).await?;
            for target in runtime.manager.target_serials(&pool, &zone).await? {
                match target.serial {
                    Ok(Some(serial)) => println!("{} ({}): {}", target.target_id, target.backend_type, serial),
                    Ok(None) => println!("{} ({}): zone not present", target.target_id, target.backend_type),
                    Err(e) => println!("{} ({}): error: {}", target.target_id, target.backend_type, e),
                }
            }
            Ok(())
        }
        Command::CheckDrift { zone, nameserver } => {
            let nameserver = parse_nameserver(&nameserver)?;
            let runtime = build_runtime(&config).await?;
            if !check_drift(runtime, &zone, &nameserver).await? {
                return Err(format!("{zone} on {nameserver} has drifted from the central store").into());
            }
            Ok(())
        }
    }
}
