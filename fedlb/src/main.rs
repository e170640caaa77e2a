//! Process entry point (C11/C13): parse configuration, load the topology,
//! cross the rendezvous barrier, then run every concurrent subsystem
//! (control plane, per-peer feedback, HTTP ingress, telemetry, metrics)
//! until the telemetry sampler's drain tick exits the process (§4.7).

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use fedlb_barrier::{wait_for_start, Coordinator, RedisCoordinator};
use fedlb_core::LbInstance;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = cli.validate() {
        error!(error = %e, "fatal startup error");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let own_address = match &cli.self_addr {
        Some(addr) => addr.clone(),
        None => fedlb_topology::discover_self_address()
            .context("self-address discovery failed")?,
    };

    let raw_topology =
        fedlb_topology::load_topology(&cli.topology).context("loading topology file")?;
    let federation_size = raw_topology.len();
    let resolved = fedlb_topology::resolve(&raw_topology, &own_address, cli.cluster_num, &cli.topology)
        .context("resolving own cluster in topology")?;

    info!(
        own_address = %resolved.own_address,
        peers = resolved.peers.len(),
        backends = resolved.backends.len(),
        is_leader = resolved.is_leader,
        first_hop = resolved.first_hop_address.as_deref().unwrap_or("<none>"),
        "topology resolved, constructing lb instance"
    );

    let instance = LbInstance::new(
        resolved.own_address.clone(),
        resolved.first_hop_address.clone(),
        cli.tunables(),
        resolved.peers.clone(),
        resolved.backends,
    );

    let coordinator: Arc<dyn Coordinator> = Arc::new(
        RedisCoordinator::new(&cli.coordinator_url)
            .map_err(|e| fedlb_core::StartupError::Coordination(e.to_string()))?,
    );
    wait_for_start(
        coordinator,
        &resolved.own_address,
        federation_size,
        resolved.is_leader,
    )
    .await
    .map_err(|e| fedlb_core::StartupError::Coordination(e.to_string()))?;

    info!("barrier released, spawning subsystems");

    let control_port = instance.tunables.control_port;
    let drain_port = instance.tunables.drain_port;
    let cluster_label = format!("cluster{}", cli.cluster_num);

    let mut tasks: tokio::task::JoinSet<anyhow::Result<()>> = tokio::task::JoinSet::new();

    {
        let instance = instance.clone();
        tasks.spawn(async move {
            fedlb_feedback::run_control_plane_server(instance, control_port)
                .await
                .context("control plane server exited")
        });
    }

    for peer in &resolved.peers {
        let instance = instance.clone();
        let peer_id = peer.id;
        let peer_address = peer.address.clone();
        tasks.spawn(async move {
            if let Err(e) =
                fedlb_feedback::run_peer_feedback(instance, peer_id, peer_address.clone(), control_port)
                    .await
            {
                tracing::warn!(peer = %peer_address, error = %e, "peer feedback task ended");
            }
            Ok(())
        });
    }

    {
        let instance = instance.clone();
        tasks.spawn(async move {
            fedlb_dispatch::run_ingress(instance)
                .await
                .context("http ingress server exited")
        });
    }

    let sampler = fedlb_telemetry::Sampler::new(instance.clone(), fedlb_telemetry::DEFAULT_CAPACITY);
    {
        let sampler = sampler.clone();
        tasks.spawn(async move {
            sampler.run().await;
            Ok(())
        });
    }
    {
        let sampler = sampler.clone();
        tasks.spawn(async move {
            fedlb_telemetry::run_drain_server(sampler, drain_port)
                .await
                .context("drain server exited")
        });
    }

    {
        let instance = instance.clone();
        tasks.spawn(async move {
            fedlb_metrics::run_metrics_server(instance, cluster_label, cli.metrics_port)
                .await
                .context("metrics server exited")
        });
    }

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = ?e, "a subsystem task exited with an error"),
            Err(join_err) => error!(error = %join_err, "a subsystem task panicked"),
        }
    }

    Ok(())
}
