//! igate - mesh to APRS-IS gateway node
//!
//! This binary wires the workspace together: a mesh device transport (TCP,
//! or serial with the `serial` feature), the APRS-IS session, the backend
//! heartbeat client and the SQLite record store, all driven by the gateway
//! orchestrator task.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use igate_aprs::TcpLineIo;
use igate_gateway::{
    Gateway, GatewayConfig, GatewayConfigBuilder, GatewayEvent, HttpBackend, LogLevel,
};
use igate_proto::{MeshTransport, TcpTransport};
use igate_state::{MemoryStore, RecordStore, SqliteStore};

#[derive(Parser)]
#[command(name = "igate")]
#[command(about = "Mesh to APRS-IS gateway")]
#[command(version)]
struct Args {
    /// Mesh device address (host:port)
    #[arg(long, default_value = "127.0.0.1:4403")]
    device: String,

    /// Serial port path instead of a TCP device (requires the serial build)
    #[cfg(feature = "serial")]
    #[arg(long)]
    serial: Option<String>,

    /// APRS-IS server (host:port)
    #[arg(long, default_value = "rotate.aprs2.net:14580")]
    aprs_server: String,

    /// APRS-IS filter command sent after login
    #[arg(long)]
    filter: Option<String>,

    /// Provisioning backend base URL
    #[arg(long, default_value = "http://127.0.0.1:8600")]
    backend_url: String,

    /// Backend API key; falls back to the key stored from a previous run
    #[arg(long, env = "IGATE_API_KEY")]
    api_key: Option<String>,

    /// Backend heartbeat interval (e.g. 60s, 5m)
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    heartbeat_interval: Duration,

    /// Self beacon interval, clamped to [1m, 24h]
    #[arg(long, default_value = "20m", value_parser = humantime::parse_duration)]
    beacon_interval: Duration,

    /// Database path
    #[arg(long, default_value = "igate.db")]
    db: String,

    /// Keep all state in memory (no database)
    #[arg(long)]
    ephemeral: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting igate");

    let store: Arc<dyn RecordStore> = if args.ephemeral {
        info!("Running with in-memory state");
        Arc::new(MemoryStore::new())
    } else {
        let url = format!("sqlite:{}?mode=rwc", args.db);
        Arc::new(SqliteStore::new(&url).await?)
    };

    // A key given on the command line replaces the stored one; an auth
    // rejection later clears the stored copy so the next run starts bare.
    let api_key = match &args.api_key {
        Some(key) => {
            if let Err(e) = store
                .set("meta", "api_key", serde_json::json!(key.clone()))
                .await
            {
                warn!(error = %e, "Failed to store API key");
            }
            Some(key.clone())
        }
        None => store
            .get("meta", "api_key")
            .await
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(String::from)),
    };
    if api_key.is_none() {
        warn!("No backend API key configured; heartbeats will be rejected");
    }

    let mut builder = GatewayConfigBuilder::new()
        .device(args.device.clone())
        .aprs_server(args.aprs_server.clone())
        .backend_url(args.backend_url.clone())
        .heartbeat_interval(args.heartbeat_interval)
        .beacon_interval(args.beacon_interval);
    if let Some(filter) = &args.filter {
        builder = builder.aprs_filter(filter.clone());
    }
    if let Some(key) = &api_key {
        builder = builder.api_key(key.clone());
    }
    let config = builder.build();

    let backend = HttpBackend::new(&args.backend_url, api_key.unwrap_or_default());

    #[cfg(feature = "serial")]
    if let Some(port) = &args.serial {
        let transport = igate_proto::SerialTransport::new(port);
        return run_gateway(config, transport, backend, store).await;
    }

    let transport = TcpTransport::new(&args.device);
    run_gateway(config, transport, backend, store).await
}

async fn run_gateway<T>(
    config: GatewayConfig,
    transport: T,
    backend: HttpBackend,
    store: Arc<dyn RecordStore>,
) -> anyhow::Result<()>
where
    T: MeshTransport + Send + 'static,
{
    let (gateway, handle) = Gateway::new(config, transport, TcpLineIo::new(), backend, store);
    let mut events = handle.subscribe();
    let task = tokio::spawn(gateway.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                handle.shutdown().await.ok();
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(GatewayEvent::Log { level: LogLevel::Error, message }) => {
                        warn!(detail = %message, "Gateway error event");
                    }
                    Ok(GatewayEvent::ConnectionStatus(status)) => {
                        debug!(
                            device = status.device_connected,
                            aprs = %status.aprs_state,
                            backend_verified = status.backend_verified,
                            degraded = status.backend_degraded,
                            "Status"
                        );
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    task.await??;
    Ok(())
}
