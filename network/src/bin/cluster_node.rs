//! Cluster node runner
//!
//! Thin assembly point: loads the cluster configuration, materializes the
//! topology matrix and peer directory, and runs the connectivity layer for
//! one identity until interrupted. Application handlers are registered by the
//! hosting process; this runner starts with an empty dispatcher.

use anyhow::{bail, Context};
use crosslink_network::{ClusterNode, DispatcherBuilder, LinkOptions};
use crosslink_topology::{ClusterConfig, PeerIdentity, Role};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        bail!("usage: cluster_node <config.yaml> <role> <instance> [sub]");
    }

    let config = ClusterConfig::from_file(&args[1])
        .with_context(|| format!("loading cluster config {}", args[1]))?;
    let role: Role = args[2].parse()?;
    let instance: u32 = args[3].parse().context("parsing instance id")?;
    let sub: u32 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(0);

    let identity = PeerIdentity::new(role, instance, sub);
    let directory = config.build_directory();
    let listen_addr = directory
        .address_of(identity)
        .with_context(|| format!("identity {} not in peer directory", identity))?;

    let node = ClusterNode::start(
        identity,
        listen_addr,
        Arc::new(config.build_matrix()),
        directory,
        Arc::new(DispatcherBuilder::new().build()),
        LinkOptions::default(),
    )
    .await?;

    info!(identity = %identity, addr = %node.local_addr(), "node running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
