//! memkv server.
//!
//! This file is the entry point for the server implemented in the library.
//! It performs command line parsing and passes the configuration on to
//! `memkv::server`.
//!
//! The `clap` crate is used for parsing arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::signal;

use memkv::config::{DbConfig, StartupFormat};
use memkv::consts::{DEFAULT_AOF_SYNC_PERIOD_SECS, DEFAULT_HOST, DEFAULT_SNAPSHOT_PERIOD_SECS};
use memkv::error::MemKvServerError;
use memkv::{logger, server};

#[derive(Parser, Debug)]
#[command(
    name = "memkv-server",
    version,
    author,
    about = "Serve the in-memory key-value store over HTTP"
)]
struct Cli {
    /// Address to listen for requests on.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// File containing data to initialize the database with.
    #[arg(long)]
    startup_file: Option<PathBuf>,

    /// Whether the startup file is a snapshot document or an append-only log.
    #[arg(long, value_enum, default_value_t = StartupFormat::Snapshot)]
    startup_format: StartupFormat,

    /// Enable periodic snapshot persistence.
    #[arg(long, requires = "persist_file")]
    persist: bool,

    /// File to write snapshots to.
    #[arg(long, requires = "persist")]
    persist_file: Option<PathBuf>,

    /// Seconds between snapshot persistence cycles.
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_PERIOD_SECS)]
    persist_cycle: u64,

    /// Enable append-only-file persistence.
    #[arg(long, requires = "aof_persist_file")]
    aof_persist: bool,

    /// File to append the command log to.
    #[arg(long, requires = "aof_persist")]
    aof_persist_file: Option<PathBuf>,

    /// Seconds between append-only-file fsync cycles.
    #[arg(long, default_value_t = DEFAULT_AOF_SYNC_PERIOD_SECS)]
    aof_persist_cycle: u64,

    /// Disable logging output.
    #[arg(long)]
    no_log: bool,
}

#[tokio::main]
pub async fn main() -> Result<(), MemKvServerError> {
    let cli = init();

    let mut config = DbConfig::new();
    if let Some(file) = cli.startup_file.clone() {
        config = config.with_startup_file(file, cli.startup_format);
    }
    if cli.persist {
        if let Some(file) = cli.persist_file.clone() {
            config = config
                .with_snapshot_persistence(file)
                .with_snapshot_persistence_period(Duration::from_secs(cli.persist_cycle));
        }
    }
    if cli.aof_persist {
        if let Some(file) = cli.aof_persist_file.clone() {
            config = config
                .with_aof_persistence(file)
                .with_aof_persistence_period(Duration::from_secs(cli.aof_persist_cycle));
        }
    }

    // Bind the listener before handing off to the server.
    let listener = TcpListener::bind(&cli.host).await?;

    server::run(listener, config, shutdown_signal()).await
}

fn init() -> Cli {
    dotenv().ok();
    let cli = Cli::parse();
    logger::init(cli.no_log);
    cli
}

/// Completes on SIGINT or SIGTERM, triggering graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
