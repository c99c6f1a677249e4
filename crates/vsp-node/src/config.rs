//! Node configuration.

use crate::Args;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use vsp_network::{
    ConnectionConfig, GossipConfig, KeepaliveConfig, NetworkConfig, ServiceSet, ServiceType,
    MAINNET_MAGIC, PROTOCOL_VERSION, TESTNET_MAGIC,
};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Network (mainnet, testnet).
    pub network: String,
    /// P2P configuration.
    #[serde(default)]
    pub p2p: P2pConfig,
    /// Admin RPC configuration.
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub gossip: GossipSection,
    #[serde(default)]
    pub keepalive: KeepaliveSection,
}

/// P2P configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// P2P bind address.
    pub bind_address: String,
    /// Endpoint advertised to peers, when it differs from the bind address.
    pub advertised_address: Option<String>,
    /// `host[:port]` peers dialed at startup.
    pub bootstrap: Vec<String>,
    /// Services advertised in the handshake.
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    /// Maximum inbound connections.
    pub max_inbound: usize,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub resolve_timeout_secs: u64,
}

fn default_services() -> Vec<String> {
    ServiceType::full_set()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", vsp_network::DEFAULT_PORT),
            advertised_address: None,
            bootstrap: Vec::new(),
            services: default_services(),
            max_inbound: 125,
            connect_timeout_secs: default_timeout_secs(),
            send_timeout_secs: default_timeout_secs(),
            resolve_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Admin RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin bind address. Keep it on loopback.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("127.0.0.1:{}", vsp_network::DEFAULT_PORT + 1),
        }
    }
}

/// Address gossip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipSection {
    pub interval_secs: u64,
    pub fanout: usize,
    pub max_dials_per_tick: usize,
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            fanout: 3,
            max_dials_per_tick: 8,
        }
    }
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveSection {
    pub interval_secs: u64,
    /// Silence after which a peer is pinged.
    pub idle_secs: u64,
    /// Silence after which a peer is closed.
    pub death_secs: u64,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            idle_secs: 60,
            death_secs: 180,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::default_for_network("mainnet")
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)
        };

        config.network = args.network.clone();

        // Only override if explicitly provided via CLI
        if let Some(ref p2p_bind) = args.p2p_bind {
            config.p2p.bind_address = p2p_bind.clone();
        }
        if let Some(ref advertise) = args.advertise {
            config.p2p.advertised_address = Some(advertise.clone());
        }
        if let Some(ref admin_bind) = args.admin_bind {
            config.admin.bind_address = admin_bind.clone();
        }
        if !args.bootstrap.is_empty() {
            config.p2p.bootstrap = args.bootstrap.clone();
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        Self {
            node_name: "vsp-node".to_string(),
            network: network.to_string(),
            p2p: P2pConfig::default(),
            admin: AdminConfig::default(),
            gossip: GossipSection::default(),
            keepalive: KeepaliveSection::default(),
        }
    }

    /// Network magic for the configured network.
    pub fn magic(&self) -> Result<[u8; 4]> {
        match self.network.as_str() {
            "mainnet" => Ok(MAINNET_MAGIC),
            "testnet" => Ok(TESTNET_MAGIC),
            other => bail!("Unknown network: {}", other),
        }
    }

    /// Translate into the network service configuration.
    pub fn to_network_config(&self) -> Result<NetworkConfig> {
        let listen_addr: SocketAddr = self
            .p2p
            .bind_address
            .parse()
            .with_context(|| format!("Invalid P2P bind address {:?}", self.p2p.bind_address))?;
        let advertised_endpoint = self
            .p2p
            .advertised_address
            .as_deref()
            .map(|a| {
                a.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid advertised address {:?}", a))
            })
            .transpose()?;
        let admin_addr: SocketAddr = self
            .admin
            .bind_address
            .parse()
            .with_context(|| format!("Invalid admin bind address {:?}", self.admin.bind_address))?;

        let services = self
            .p2p
            .services
            .iter()
            .map(|s| s.parse::<ServiceType>())
            .collect::<Result<ServiceSet, _>>()
            .context("Invalid service in p2p.services")?;

        let magic = self.magic()?;

        Ok(NetworkConfig {
            listen_addr,
            advertised_endpoint,
            admin_addr,
            magic,
            version: PROTOCOL_VERSION.to_string(),
            services,
            bootstrap: self.p2p.bootstrap.clone(),
            default_port: vsp_network::DEFAULT_PORT,
            resolve_timeout: Duration::from_secs(self.p2p.resolve_timeout_secs),
            max_inbound: self.p2p.max_inbound,
            observer_queue: NetworkConfig::default().observer_queue,
            connection: ConnectionConfig {
                connect_timeout: Duration::from_secs(self.p2p.connect_timeout_secs),
                send_timeout: Duration::from_secs(self.p2p.send_timeout_secs),
                magic,
                ..Default::default()
            },
            gossip: GossipConfig {
                interval: Duration::from_secs(self.gossip.interval_secs),
                fanout: self.gossip.fanout,
                max_dials_per_tick: self.gossip.max_dials_per_tick,
            },
            keepalive: KeepaliveConfig {
                interval: Duration::from_secs(self.keepalive.interval_secs),
                idle_threshold: Duration::from_secs(self.keepalive.idle_secs),
                death_threshold: Duration::from_secs(self.keepalive.death_secs),
            },
        })
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["vsp-node"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.network, "mainnet");
        let network = config.to_network_config().unwrap();
        assert_eq!(network.listen_addr.port(), vsp_network::DEFAULT_PORT);
        assert_eq!(network.magic, MAINNET_MAGIC);
        assert_eq!(network.services, ServiceType::full_set());
        assert!(network.admin_addr.ip().is_loopback());
    }

    #[test]
    fn test_testnet_config() {
        let config = NodeConfig::default_for_network("testnet");
        assert_eq!(config.magic().unwrap(), TESTNET_MAGIC);
        assert!(NodeConfig::default_for_network("devnet").magic().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_cli() {
        let args = args(&[
            "--config",
            "/nonexistent/vsp-node.toml",
            "--p2p-bind",
            "127.0.0.1:40001",
            "--bootstrap",
            "10.0.0.1,10.0.0.2:50051",
        ]);
        let config = NodeConfig::load(&args.config, &args).unwrap();
        assert_eq!(config.p2p.bind_address, "127.0.0.1:40001");
        assert_eq!(config.p2p.bootstrap.len(), 2);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vsp-node.toml");
        std::fs::write(
            &path,
            r#"
node_name = "seed-1"
network = "mainnet"

[p2p]
bind_address = "0.0.0.0:50051"
bootstrap = ["seed.example.org"]
services = ["blockchain_full", "miner"]
max_inbound = 8

[keepalive]
interval_secs = 5
idle_secs = 20
death_secs = 60
"#,
        )
        .unwrap();

        let args = args(&["--config", path.to_str().unwrap()]);
        let config = NodeConfig::load(&path, &args).unwrap();
        assert_eq!(config.node_name, "seed-1");
        assert_eq!(config.gossip.fanout, 3);

        let network = config.to_network_config().unwrap();
        assert_eq!(network.services.len(), 2);
        assert_eq!(network.max_inbound, 8);
        assert_eq!(network.keepalive.idle_threshold, Duration::from_secs(20));
        assert_eq!(network.connection.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_service_rejected() {
        let mut config = NodeConfig::default();
        config.p2p.services = vec!["archive".to_string()];
        assert!(config.to_network_config().is_err());
    }
}
