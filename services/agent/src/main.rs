//! doko
//!
//! Registers the labelled Docker containers of this host with the local
//! Consul agent and keeps the registrations in step as containers come
//! and go.
//!
//! ## Tasks
//!
//! - **Watcher**: turns Docker start/die events into reconciliation signals
//! - **Resync ticker**: requests a full pass at a fixed interval
//! - **Trigger loop**: debounces signals and runs one pass at a time
//! - **Heartbeat**: keeps the agent's own TTL check passing

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use doko_agent::consul::ConsulClient;
use doko_agent::docker::DockerClient;
use doko_agent::registry::Registry;
use doko_agent::runtime::WorkloadRuntime;
use doko_agent::{heartbeat, identity, watcher};
use doko_agent::{signal_channel, Config, Reconciler, Signal, TriggerLoop};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "doko", version, about = "Docker to Consul service registration")]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Remove this agent's liveness registration and exit.
    #[arg(long)]
    deregister: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting doko");

    let instance_id = identity::ensure_instance_id(&config.id_file).await?;
    let consul = ConsulClient::new(&config.consul_addr, config.consul_token.clone())
        .context("failed to create Consul client")?;
    let registry: Arc<dyn Registry> = Arc::new(consul);

    if cli.deregister {
        identity::deregister_instance(registry.as_ref(), &instance_id).await?;
        return Ok(());
    }

    let socket = config.docker_socket()?;
    let docker = DockerClient::new(&socket);
    if !docker.socket_exists() {
        warn!(socket = %socket.display(), "Docker socket not found, passes will fail until it appears");
    }
    let runtime: Arc<dyn WorkloadRuntime> = Arc::new(docker);

    info!(
        instance_id = %instance_id,
        consul_addr = %config.consul_addr,
        docker_socket = %socket.display(),
        check_addr = %config.check_addr,
        debounce_ms = config.debounce().as_millis() as u64,
        resync_interval_secs = config.resync_interval().as_secs(),
        "Configuration loaded"
    );

    if config.heartbeat_interval_capped() {
        warn!(
            configured_secs = config.heartbeat_interval_secs,
            heartbeat_interval_secs = config.heartbeat_interval().as_secs(),
            ttl_secs = identity::INSTANCE_CHECK_TTL.as_secs(),
            "Heartbeat interval too long for the liveness TTL, shortening it"
        );
    }

    identity::register_instance(registry.as_ref(), &instance_id).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (signals, signal_rx) = signal_channel(config.signal_capacity());

    let heartbeat_handle = tokio::spawn(heartbeat::run_heartbeat_loop(
        Arc::clone(&registry),
        instance_id.check_id(),
        config.heartbeat_interval(),
        shutdown_rx.clone(),
    ));

    let watcher_handle = tokio::spawn(watcher::watch_events(
        Arc::clone(&runtime),
        signals.clone(),
        config.resubscribe_delay(),
        shutdown_rx.clone(),
    ));

    let ticker_handle = tokio::spawn(watcher::run_resync_ticker(
        signals.clone(),
        config.resync_interval(),
        shutdown_rx.clone(),
    ));

    let reconciler = Reconciler::new(
        Arc::clone(&runtime),
        Arc::clone(&registry),
        config.check_addr.clone(),
    );
    let trigger = TriggerLoop::new(
        Arc::new(reconciler),
        signal_rx,
        signals.clone(),
        config.debounce(),
    );
    let mut trigger_handle = tokio::spawn(trigger.run(shutdown_rx.clone()));

    signals.send(Signal::Startup);

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let trigger_exited = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt");
                break false;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                break false;
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, requesting a reconciliation pass");
                signals.send(Signal::Manual);
            }
            result = &mut trigger_handle => {
                match result {
                    Ok(stats) => warn!(passes = stats.passes, "Trigger loop exited"),
                    Err(e) => error!(error = %e, "Trigger loop panicked"),
                }
                break true;
            }
        }
    };

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    if !trigger_exited {
        match trigger_handle.await {
            Ok(stats) => info!(
                passes = stats.passes,
                failures = stats.failures,
                "Trigger loop stopped"
            ),
            Err(e) => error!(error = %e, "Trigger loop panicked"),
        }
    }
    for (name, result) in [
        ("heartbeat", heartbeat_handle.await.map(|_| ())),
        ("watcher", watcher_handle.await.map(|_| ())),
        ("ticker", ticker_handle.await.map(|_| ())),
    ] {
        if let Err(e) = result {
            error!(task = name, error = %e, "Task panicked");
        }
    }

    info!("doko shutdown complete");
    Ok(())
}
