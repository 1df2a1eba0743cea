// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Vertac - industrial cycle monitoring
//!
//! `vertac edge` runs the edge connector against a backend over HTTP.
//! `vertac demo` runs the whole pipeline in one process: simulated sensors,
//! the live engine, analysis and the WebSocket feed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vertac::core::Scheduler;
use vertac::streaming::WebSocketServer;
use vertac::{Config, Database, EdgeConnector, Engine, EventBus, HttpTransport, LocalTransport, VERSION};

/// Vertac - industrial cycle monitoring
#[derive(Parser, Debug)]
#[command(name = "vertac")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Cycle segmentation, deviation detection and resilient edge ingest")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read sensors and ship them to a backend
    Edge {
        /// Backend base URL
        #[arg(long)]
        backend_url: Option<String>,

        /// Device name used at registration
        #[arg(long)]
        device_name: Option<String>,
    },

    /// Simulated sensors feeding an in-process engine
    Demo {
        /// Serve live events on this WebSocket port
        #[arg(long)]
        ws_port: Option<u16>,

        /// Length of each simulated cycle in seconds
        #[arg(long, default_value = "20")]
        cycle_secs: u64,

        /// Time from a stop to the next start in seconds, at least the grace period
        #[arg(long, default_value = "15")]
        idle_secs: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true);

    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = builder.with_max_level(log_level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Vertac v{} - industrial cycle monitoring", VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;

    match args.command {
        Command::Edge {
            backend_url,
            device_name,
        } => {
            if let Some(url) = backend_url {
                config.edge.backend_url = url;
            }
            if let Some(name) = device_name {
                config.edge.device_name = name;
            }
            rt.block_on(run_edge(config))
        }
        Command::Demo {
            ws_port,
            cycle_secs,
            idle_secs,
        } => {
            if let Some(port) = ws_port {
                config.streaming.websocket_enabled = true;
                config.streaming.websocket_port = port;
            }
            rt.block_on(run_demo(
                config,
                Duration::from_secs(cycle_secs),
                Duration::from_secs(idle_secs),
            ))
        }
    }
}

/// Edge connector against a remote backend
async fn run_edge(config: Config) -> Result<()> {
    let transport = Arc::new(
        HttpTransport::new(&config.edge.backend_url, config.buffer.send_timeout())
            .context("building HTTP client")?,
    );
    let connector = EdgeConnector::new(&config, transport).context("opening edge buffer")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let run = connector.run(shutdown_rx);
    tokio::pin!(run);

    info!("🚀 Edge connector running against {}", config.edge.backend_url);
    info!("   Press Ctrl+C to shutdown");

    tokio::select! {
        _ = &mut run => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, draining...");
            let _ = shutdown_tx.send(());
            run.await;
        }
    }

    Ok(())
}

/// Everything in one process
async fn run_demo(config: Config, cycle_len: Duration, idle: Duration) -> Result<()> {
    let db = Arc::new(Database::open(&config.database).context("opening database")?);
    info!("Database opened at {:?}", config.database.path);

    let bus = Arc::new(EventBus::new(config.streaming.event_capacity));
    let engine = Engine::with_database(&config, db.clone(), bus.clone());
    let scheduler = Scheduler::new();

    engine.spawn_liveness(&scheduler);

    let retention_days = config.database.retention_days;
    let cleanup_db = db.clone();
    scheduler.every("cleanup", Duration::from_secs(3600), move || {
        let db = cleanup_db.clone();
        async move {
            if let Err(e) = db.cleanup(retention_days) {
                warn!("Database cleanup failed: {}", e);
            }
        }
    });

    let _ws = if config.streaming.websocket_enabled {
        let server = WebSocketServer::new(&config.streaming);
        server.start(bus.clone(), scheduler.shutdown_signal()).await?;
        Some(server)
    } else {
        None
    };

    let transport = Arc::new(LocalTransport::new(engine.clone()));
    let connector = Arc::new(EdgeConnector::new(&config, transport).context("opening edge buffer")?);

    tokio::spawn(drive_cycles(
        engine.clone(),
        connector.clone(),
        cycle_len,
        idle,
        scheduler.shutdown_signal(),
    ));

    let run = connector.run(scheduler.shutdown_signal());
    tokio::pin!(run);

    info!("🚀 Vertac demo running ({}s cycles)", cycle_len.as_secs());
    info!("   Press Ctrl+C to shutdown");

    tokio::select! {
        _ = &mut run => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, cleaning up...");
            scheduler.shutdown().await;
            run.await;
        }
    }

    info!("Vertac shutdown complete");
    Ok(())
}

/// Start and stop cycles on the demo stream at a fixed cadence
async fn drive_cycles(
    engine: Arc<Engine>,
    connector: Arc<EdgeConnector>,
    cycle_len: Duration,
    idle: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let stream_id = loop {
        if let Some(id) = connector.buffer().stream_id() {
            break id;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = shutdown.recv() => return,
        }
    };

    loop {
        if let Err(e) = engine.start_cycle(&stream_id, None) {
            warn!("Could not start cycle: {}", e);
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(cycle_len) => {}
            _ = shutdown.recv() => return,
        }

        if let Err(e) = engine.stop_cycle(&stream_id) {
            warn!("Could not stop cycle: {}", e);
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(idle) => {}
            _ = shutdown.recv() => return,
        }
    }
}
