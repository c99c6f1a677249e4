//! VSP registry crawler.
//!
//! Entry point for the vsp-crawler binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vsp_crawler::crawler::resolve_admin_addr;
use vsp_crawler::{Crawler, CrawlerConfig};
use vsp_network::AdminClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = CrawlerConfig::parse();

    let log_level = match config.log_level.to_lowercase().as_str() {
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

    info!("Starting VSP crawler v{}", env!("CARGO_PKG_VERSION"));

    config.validate().context("Invalid crawler configuration")?;
    let admin_addr = resolve_admin_addr(&config.admin_addr, config.connect_timeout)
        .await
        .context("Failed to resolve admin address")?;

    info!("Admin RPC: {}", admin_addr);
    info!("Accepted P2P port: {}", config.accepted_port);
    match &config.hosts_file {
        Some(path) => info!("Hosts file: {:?}", path),
        None => info!("Hosts file: disabled"),
    }

    let admin = Arc::new(AdminClient::new(admin_addr, config.connect_timeout));
    let crawler = Crawler::new(config, admin);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    crawler.run(shutdown).await;

    info!("VSP crawler stopped");
    Ok(())
}
