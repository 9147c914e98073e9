//! SHINGO routing daemon
//!
//! Runs one node from a JSON configuration file until interrupted.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use shingo_logging::{LogConfig, ShingoSubscriberBuilder};
use shingo_node::{InterfaceConfig, NodeConfig, ShingoNode};
use tracing::{info, warn};

/// SHINGO hybrid zone routing daemon
#[derive(Parser, Debug)]
#[command(name = "shingo-node", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface address, as ADDRESS/PREFIX (repeatable, ignored with --config)
    #[arg(short, long, value_parser = parse_interface)]
    interface: Vec<(Ipv4Addr, u8)>,

    /// Log the routing tables every N seconds
    #[arg(long)]
    dump_every: Option<u64>,

    /// Pretty console output instead of JSONL
    #[arg(long)]
    pretty: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    level: String,
}

fn parse_interface(s: &str) -> Result<(Ipv4Addr, u8), String> {
    let (address, prefix) = s.split_once('/').ok_or("expected ADDRESS/PREFIX")?;
    let address = address.parse().map_err(|e| format!("bad address: {e}"))?;
    let prefix: u8 = prefix.parse().map_err(|e| format!("bad prefix: {e}"))?;
    if prefix > 32 {
        return Err("prefix exceeds 32".into());
    }
    Ok((address, prefix))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = if args.pretty {
        LogConfig::development()
    } else {
        LogConfig::default()
    };
    let _log_guard = ShingoSubscriberBuilder::new()
        .with_config(log_config)
        .with_level(args.level.clone())
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => args
            .interface
            .iter()
            .zip(1u32..)
            .fold(NodeConfig::default(), |config, (&(address, prefix), id)| {
                config.with_interface(InterfaceConfig::new(id, address, prefix))
            }),
    };
    if let Some(secs) = args.dump_every {
        config = config.with_dump_interval(Duration::from_secs(secs.max(1)));
    }

    let node = ShingoNode::bind(config).await.context("binding control sockets")?;
    let handle = node.start()?;
    info!(main = ?handle.main_address(), "Node running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not wait for Ctrl-C, stopping");
    }

    println!("{}", handle.dump_tables().await?);
    handle.shutdown().await?;
    Ok(())
}
