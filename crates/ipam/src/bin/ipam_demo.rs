//! IPAM demo
//!
//! Seeds an in-memory gateway with one pool and a handful of machines, then
//! issues blocks to every machine concurrently and prints the resulting
//! assignments and pool usage as JSON.
//!
//! Built only with the `cli` feature.
//!
//! Usage:
//!   cargo run -p ipam --features cli --bin ipam-demo -- --pool 192.0.2.0/24 --prefix 30 \
//!       --clients 4 --blocks 2

use anyhow::{Context, Result};
use clap::Parser;
use ipam::{IpamConfig, IpamManager, MemoryGateway, PoolDescriptor};
use ipnet::IpNet;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ipam-demo", about = "Issue address blocks from an in-memory pool")]
struct Cli {
    /// Pool network to carve
    #[arg(long, default_value = "192.0.2.0/24")]
    pool: IpNet,

    /// Prefix length of each issued block
    #[arg(long, default_value_t = 30)]
    prefix: u8,

    /// Number of machines requesting blocks
    #[arg(long, default_value_t = 4)]
    clients: usize,

    /// Blocks requested per machine
    #[arg(long, default_value_t = 2)]
    blocks: usize,

    /// Gateway call timeout
    #[arg(long, default_value = "10s")]
    timeout: humantime::Duration,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let gateway = Arc::new(MemoryGateway::new());
    gateway.add_pool(PoolDescriptor::new(0, "demo", "local", cli.pool, cli.prefix));
    let names: Vec<String> = (0..cli.clients).map(|i| format!("machine-{}", i)).collect();
    for name in &names {
        gateway.add_client(name.clone(), format!("{}-token", name));
    }

    let config = IpamConfig {
        gateway_timeout: cli.timeout.into(),
        ..Default::default()
    };
    let manager = Arc::new(IpamManager::with_config(gateway, config));
    manager.load().await.context("failed to load pools")?;

    let mut tasks = Vec::new();
    for name in names {
        let manager = manager.clone();
        let blocks = cli.blocks;
        tasks.push(tokio::spawn(async move {
            let mut issued = Vec::new();
            for _ in 0..blocks {
                let block = manager.create_block("demo", &name).await?;
                let address = block.reserve_next().await?;
                block.mark_utilized(address).await?;
                let iface = block.interface_address(address).await?;
                issued.push(json!({
                    "block": block.cidr().to_string(),
                    "address": iface.address.to_string(),
                    "prefix_len": iface.prefix_len,
                    "family": iface.family,
                }));
            }
            Ok::<_, ipam::Error>(json!({ "client": name, "blocks": issued }))
        }));
    }

    let mut assignments = Vec::new();
    for task in tasks {
        match task.await.context("allocation task panicked")? {
            Ok(assignment) => assignments.push(assignment),
            Err(e) => assignments.push(json!({
                "error": e.to_string(),
                "code": e.response_code(),
            })),
        }
    }

    let report = json!({
        "assignments": assignments,
        "usage": manager.usage().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
