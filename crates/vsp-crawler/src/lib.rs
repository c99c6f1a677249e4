//! # vsp-crawler
//!
//! Checks a node through its admin RPC, keeps a TTL-aged pool of verified
//! peers and publishes a subset of them as a DNS hosts file.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod crawler;
mod error;
pub mod hosts;
pub mod peers;

pub use admin::{connect_succeeded, NodeAdmin};
pub use bootstrap::BootstrapSet;
pub use config::{parse_duration, CrawlerConfig};
pub use crawler::{Crawler, DiscoveryReport, PublishReport};
pub use error::{CrawlerError, CrawlerResult};
pub use hosts::{HostsLayout, HostsSource, Ipv4Cidr};
pub use peers::{CrawlState, PeerInfo, PeerManager};
