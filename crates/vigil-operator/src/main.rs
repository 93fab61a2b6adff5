//! Vigil operator - cluster node health controller

use std::time::Duration;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigil_node::NodeHealthConfig;

mod runner;

/// Vigil - watches cluster nodes and evicts pods from dead ones, with
/// per-zone rate limits and partition-aware safeguards.
#[derive(Parser, Debug)]
#[command(name = "vigil-operator", version, about, long_about = None)]
struct Cli {
    /// Time from the last known-bad observation to the eviction trigger
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pod_eviction_timeout: Duration,

    /// Grace after which a heartbeat-less node is marked Unknown
    #[arg(long, default_value = "40s", value_parser = humantime::parse_duration)]
    node_monitor_grace_period: Duration,

    /// Grace applied while a node has never reported status
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    node_startup_grace_period: Duration,

    /// Period of the status monitor loop
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    node_monitor_period: Duration,

    /// Token-bucket refill rate for the per-zone eviction queues
    #[arg(long, default_value_t = 0.1)]
    eviction_limiter_qps: f32,
}

impl Cli {
    fn config(&self) -> NodeHealthConfig {
        NodeHealthConfig {
            pod_eviction_timeout: self.pod_eviction_timeout,
            node_monitor_grace_period: self.node_monitor_grace_period,
            node_startup_grace_period: self.node_startup_grace_period,
            node_monitor_period: self.node_monitor_period,
            eviction_limiter_qps: self.eviction_limiter_qps,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    tracing::info!(
        monitor_period = ?config.node_monitor_period,
        grace_period = ?config.node_monitor_grace_period,
        eviction_timeout = ?config.pod_eviction_timeout,
        "Starting Vigil node controller"
    );

    let client = Client::try_default().await?;
    runner::run(client, config).await
}
