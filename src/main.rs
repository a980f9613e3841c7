//! Falcon entry point.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{debug, error, info, LevelFilter};
use tokio::signal;

use falcon::runtime::services;
use falcon::{Config, DockerRuntime, HostNetworkConfigurator, MembershipReconciler, SyncDaemon};

/// Wildcard *.docker DNS for local containers, routed through one proxy
#[derive(Parser, Debug)]
#[command(name = "falcon", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure host networking, start dnsmasq and the proxy, and keep the
    /// proxy on every container network until Ctrl+C
    Up,
    /// Restore host networking and remove the dnsmasq and proxy containers
    Down,
    /// Sync the proxy's networks once and exit
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let cfg = Config::load()?;
    init_logging(&cfg);
    debug!("Loaded config: {:?}", cfg);

    match cli.command {
        Command::Up => up(&cfg).await,
        Command::Down => down(&cfg).await,
        Command::Sync => sync_once(&cfg).await,
    }
}

fn init_logging(cfg: &Config) {
    let level = if cfg.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    // RUST_LOG still wins over the config flag.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

async fn up(cfg: &Config) -> anyhow::Result<()> {
    let host = HostNetworkConfigurator::from_config(cfg)?;
    host.configure()
        .await
        .context("Couldn't configure host networking")?;

    let runtime = DockerRuntime::connect().context("Unable to connect to the Docker daemon")?;

    info!("Starting the dnsmasq container...");
    runtime
        .ensure_running(&services::dnsmasq(cfg))
        .await
        .context("Unable to start the dnsmasq container")?;

    info!("Starting the proxy container...");
    runtime
        .ensure_running(&services::proxy(cfg))
        .await
        .context("Unable to start the proxy container")?;

    let mut daemon = SyncDaemon::new(Arc::new(runtime), cfg.proxy_container.clone());
    daemon
        .start()
        .await
        .context("Unable to start syncing the proxy's networks")?;

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }
    daemon.stop().await;

    info!("Shutdown complete. Run `falcon down` to restore host networking.");
    Ok(())
}

/// Every teardown step is attempted even when an earlier one fails.
async fn down(cfg: &Config) -> anyhow::Result<()> {
    let mut failures: Vec<anyhow::Error> = Vec::new();

    match HostNetworkConfigurator::from_config(cfg) {
        Ok(host) => {
            if let Err(e) = host.restore().await {
                failures.push(anyhow!(e).context("Couldn't restore host networking"));
            }
        }
        Err(e) => failures.push(e.into()),
    }

    match DockerRuntime::connect() {
        Ok(runtime) => {
            for name in [&cfg.dnsmasq_container, &cfg.proxy_container] {
                info!("Removing the {} container...", name);
                if let Err(e) = runtime.remove_container(name).await {
                    failures.push(anyhow!(e).context(format!("Unable to remove {}", name)));
                }
            }
        }
        Err(e) => failures.push(anyhow!(e).context("Unable to connect to the Docker daemon")),
    }

    if failures.is_empty() {
        info!("Host networking restored.");
        return Ok(());
    }
    for failure in &failures {
        error!("{:#}", failure);
    }
    Err(anyhow!("{} teardown step(s) failed", failures.len()))
}

async fn sync_once(cfg: &Config) -> anyhow::Result<()> {
    let runtime = DockerRuntime::connect().context("Unable to connect to the Docker daemon")?;
    let reconciler = MembershipReconciler::new(Arc::new(runtime), cfg.proxy_container.clone());
    let diff = reconciler.reconcile().await.context("Sync failed")?;
    info!(
        "Joined {:?}, left {:?}",
        diff.to_join, diff.to_leave
    );
    Ok(())
}
