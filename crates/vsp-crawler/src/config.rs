//! Crawler configuration, read from the environment or the command line.

use crate::error::{CrawlerError, CrawlerResult};
use crate::hosts::Ipv4Cidr;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;
use vsp_network::ServiceType;

/// Registry crawler for the VSP network.
#[derive(Parser, Debug, Clone)]
#[command(name = "vsp-crawler")]
#[command(author, version, about, long_about = None)]
pub struct CrawlerConfig {
    /// Node admin RPC endpoint (`host:port`)
    #[arg(long, env = "APP_GRPC_ADDR_PORT")]
    pub admin_addr: String,

    /// Port a peer must advertise to be published
    #[arg(long, env = "ACCEPTED_P2P_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub accepted_port: u16,

    /// Hosts file publish period
    #[arg(long, env = "SEED_UPDATE_INTERVAL", value_parser = parse_duration)]
    pub update_interval: Duration,

    /// Hosts file path; unset disables file output
    #[arg(long, env = "SEED_HOSTS_FILE")]
    pub hosts_file: Option<PathBuf>,

    #[arg(long, env = "SEED_NAMESPACE", default_value = "vsp-blockchain")]
    pub namespace: String,

    #[arg(long, env = "SEED_ENDPOINTS_NAME", default_value = "miner-seed")]
    pub service_name: String,

    #[arg(long, env = "SEED_DNS_ZONE", default_value = "seed.local")]
    pub zone: String,

    /// Discovery tick period
    #[arg(long, env = "PEER_DISCOVERY_INTERVAL", default_value = "30s", value_parser = parse_duration)]
    pub discovery_interval: Duration,

    /// How long a verified peer stays trusted before re-verification
    #[arg(long, env = "PEER_KNOWN_TTL", default_value = "15m", value_parser = parse_duration)]
    pub known_ttl: Duration,

    /// Peers published per hosts file
    #[arg(long, env = "PEER_REGISTRY_SUBSET_SIZE", default_value_t = 5)]
    pub subset_size: usize,

    /// Comma-separated `host[:port]` bootstrap list
    #[arg(long, env = "SEED_BOOTSTRAP_ENDPOINTS", value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// Publish random IPs instead of peers (testing only)
    #[arg(
        long,
        env = "SEED_DNS_DEBUG_RANDOM_IPS",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub debug_random_ips: bool,

    /// Range the debug IPs are drawn from
    #[arg(long, env = "SEED_DNS_DEBUG_CIDR", default_value = "10.0.0.0/8")]
    pub debug_cidr: Ipv4Cidr,

    /// Service a peer must support to be considered
    #[arg(long, env = "SEED_REQUIRED_SERVICE", default_value = "blockchain_full")]
    pub required_service: ServiceType,

    /// Deadline for each admin RPC call
    #[arg(long, env = "SEED_CONNECT_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub connect_timeout: Duration,

    /// Candidates verified per discovery tick, all within one connect timeout
    #[arg(long, env = "PEER_VERIFY_BATCH", default_value_t = 1)]
    pub verify_batch: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl CrawlerConfig {
    /// Configuration with the documented defaults for everything optional.
    pub fn new(admin_addr: impl Into<String>, accepted_port: u16, update_interval: Duration) -> Self {
        Self {
            admin_addr: admin_addr.into(),
            accepted_port,
            update_interval,
            hosts_file: None,
            namespace: "vsp-blockchain".to_string(),
            service_name: "miner-seed".to_string(),
            zone: "seed.local".to_string(),
            discovery_interval: Duration::from_secs(30),
            known_ttl: Duration::from_secs(15 * 60),
            subset_size: 5,
            bootstrap: Vec::new(),
            debug_random_ips: false,
            debug_cidr: Ipv4Cidr::new([10, 0, 0, 0].into(), 8),
            required_service: ServiceType::BlockchainFull,
            connect_timeout: Duration::from_secs(10),
            verify_batch: 1,
            log_level: "info".to_string(),
        }
    }

    /// Reject combinations clap cannot check on its own.
    pub fn validate(&self) -> CrawlerResult<()> {
        if self.admin_addr.trim().is_empty() {
            return Err(CrawlerError::Config("APP_GRPC_ADDR_PORT is empty".into()));
        }
        for (name, value) in [
            ("SEED_UPDATE_INTERVAL", self.update_interval),
            ("PEER_DISCOVERY_INTERVAL", self.discovery_interval),
            ("PEER_KNOWN_TTL", self.known_ttl),
            ("SEED_CONNECT_TIMEOUT", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(CrawlerError::Config(format!("{} must be positive", name)));
            }
        }
        if self.subset_size == 0 {
            return Err(CrawlerError::Config(
                "PEER_REGISTRY_SUBSET_SIZE must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Bootstrap entries with blanks removed.
    pub fn bootstrap_entries(&self) -> Vec<String> {
        self.bootstrap
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect()
    }
}

/// Parse durations such as `500ms`, `30s`, `15m`, `2h` or `1h30m`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in {:?}", input))?;
        if digits == 0 {
            return Err(format!("expected a number in {:?}", input));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("bad number in {:?}: {}", input, e))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let secs = |scale: u64| {
            value
                .checked_mul(scale)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {:?}", input))
        };
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => secs(60)?,
            "h" => secs(3600)?,
            other => return Err(format!("unknown unit {:?} in {:?}", other, input)),
        };
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration out of range: {:?}", input))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m"), Ok(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration("999999999999999999h").is_err());
        assert!(parse_duration("307445734561825861m").is_err());
        assert!(parse_duration("18446744073709551615s1s").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn test_parse_from_args() {
        let config = CrawlerConfig::try_parse_from([
            "vsp-crawler",
            "--admin-addr",
            "127.0.0.1:50052",
            "--accepted-port",
            "50051",
            "--update-interval",
            "1m",
            "--bootstrap",
            "10.0.0.1,seed.example.org:50051",
            "--debug-random-ips",
            "true",
        ])
        .unwrap();

        assert_eq!(config.accepted_port, 50051);
        assert_eq!(config.update_interval, Duration::from_secs(60));
        assert_eq!(config.known_ttl, Duration::from_secs(900));
        assert_eq!(config.subset_size, 5);
        assert_eq!(config.namespace, "vsp-blockchain");
        assert_eq!(config.required_service, ServiceType::BlockchainFull);
        assert_eq!(config.bootstrap_entries().len(), 2);
        assert_eq!(config.verify_batch, 1);
        assert!(config.debug_random_ips);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_zero_rejected() {
        let result = CrawlerConfig::try_parse_from([
            "vsp-crawler",
            "--admin-addr",
            "127.0.0.1:50052",
            "--accepted-port",
            "0",
            "--update-interval",
            "1m",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_subset() {
        let mut config = CrawlerConfig::new("127.0.0.1:50052", 50051, Duration::from_secs(60));
        assert!(config.validate().is_ok());
        config.subset_size = 0;
        assert!(config.validate().is_err());
    }
}
