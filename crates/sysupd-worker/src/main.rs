use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sysupd_core::link;
use sysupd_worker::socket::serve;
use sysupd_worker::{AllowListBroker, Scenario, ScenarioFactory, Worker, WorkerExit};
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sysupd-worker")]
#[command(about = "Privileged system upgrade worker", long_about = None)]
struct Cli {
    #[arg(long, default_value = "/run/sysupd.sock")]
    socket: PathBuf,
    /// Package state the worker plays back.
    #[arg(long)]
    scenario: PathBuf,
    /// Grant the upgrade action to this uid in addition to root.
    #[arg(long = "allow-uid")]
    allow_uids: Vec<u32>,
    #[arg(short, long)]
    verbose: bool,
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    let scenario = Scenario::load(&cli.scenario)?;
    if cli.socket.exists() {
        std::fs::remove_file(&cli.socket).with_context(|| {
            format!("failed removing stale socket: {}", cli.socket.display())
        })?;
    }
    let listener = UnixListener::bind(&cli.socket)
        .with_context(|| format!("failed binding {}", cli.socket.display()))?;
    info!(socket = %cli.socket.display(), "listening");

    let (worker_link, client_link) = link(32);
    let worker = Worker::new(
        ScenarioFactory::new(scenario),
        AllowListBroker::new(cli.allow_uids),
        worker_link,
    )
    .own_sender_only();
    let worker = std::thread::Builder::new()
        .name("sysupd-worker".to_string())
        .spawn(move || worker.run())
        .context("failed spawning worker thread")?;

    tokio::select! {
        served = serve(listener, client_link) => served?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            let _ = std::fs::remove_file(&cli.socket);
            return Ok(());
        }
    }
    let _ = std::fs::remove_file(&cli.socket);

    let exit = tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("failed joining worker thread")?
        .map_err(|_| anyhow!("worker thread panicked"))??;
    match exit {
        WorkerExit::Freed => info!("session freed the engine"),
        WorkerExit::SessionClosed => info!("session disconnected"),
        WorkerExit::TransportClosed => info!("transport closed"),
    }
    Ok(())
}

fn init_tracing(verbose: bool, debug: bool) {
    let default = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
