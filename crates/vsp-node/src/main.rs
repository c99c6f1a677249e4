//! VSP Node - P2P networking core of the VSP blockchain.
//!
//! This is the main entry point for the vsp-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// VSP blockchain node.
#[derive(Parser, Debug)]
#[command(name = "vsp-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vsp-node.toml")]
    config: PathBuf,

    /// Network to connect to
    #[arg(short, long, default_value = "mainnet")]
    network: String,

    /// P2P bind address
    #[arg(long)]
    p2p_bind: Option<String>,

    /// Endpoint advertised to peers
    #[arg(long)]
    advertise: Option<String>,

    /// Admin RPC bind address
    #[arg(long)]
    admin_bind: Option<String>,

    /// Comma-separated bootstrap peers (`host[:port]`)
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print version and exit
    #[arg(long)]
    version_info: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version_info {
        print_version();
        return Ok(());
    }

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting VSP node v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = NodeConfig::load(&args.config, &args)?;

    info!("Network: {}", config.network);
    info!("P2P: {}", config.p2p.bind_address);
    info!("Admin: {}", config.admin.bind_address);

    let node = Node::new(config).await?;

    // Handle shutdown signals
    let node_handle = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown();
    });

    // Run the node until shutdown
    if let Err(e) = node.run().await {
        tracing::error!("Node error: {}", e);
    }

    info!("VSP node stopped");
    Ok(())
}

fn print_version() {
    println!("VSP Node");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Protocol: {}", vsp_network::PROTOCOL_VERSION);
}
