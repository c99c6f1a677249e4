//! Resolution of `SEED_BOOTSTRAP_ENDPOINTS`.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, warn};
use vsp_network::discovery::{resolve_entry, split_host_port};

/// Resolved bootstrap addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapSet {
    /// IPv4 addresses on the accepted port, in IP string order.
    pub addrs: Vec<Ipv4Addr>,
    /// Whether any address came from a DNS name rather than a literal.
    pub from_dns: bool,
}

impl BootstrapSet {
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// Resolve every entry and keep the IPv4 addresses on `accepted_port`.
///
/// Entries without a port get `accepted_port`. Unresolvable entries are
/// logged and skipped.
pub async fn resolve(entries: &[String], accepted_port: u16, timeout: Duration) -> BootstrapSet {
    let mut addrs = BTreeSet::new();
    let mut from_dns = false;

    for entry in entries {
        let literal = split_host_port(entry, accepted_port)
            .map(|(host, _)| host.parse::<IpAddr>().is_ok())
            .unwrap_or(false);

        let resolved = match resolve_entry(entry, accepted_port, timeout).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(entry = %entry, error = %e, "Failed to resolve bootstrap endpoint");
                continue;
            }
        };

        let before = addrs.len();
        for addr in resolved {
            match addr {
                SocketAddr::V4(v4) if v4.port() == accepted_port => {
                    addrs.insert(v4.ip().to_string());
                }
                other => debug!(entry = %entry, addr = %other, "Ignoring bootstrap address"),
            }
        }
        if !literal && addrs.len() > before {
            from_dns = true;
        }
    }

    BootstrapSet {
        addrs: addrs.iter().filter_map(|s| s.parse().ok()).collect(),
        from_dns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literals_filtered_by_port() {
        let entries = vec![
            "10.0.0.2".to_string(),
            "10.0.0.1:50051".to_string(),
            "10.0.0.3:50052".to_string(),
            "[::1]:50051".to_string(),
            "10.0.0.1".to_string(),
            "host:notaport".to_string(),
        ];
        let set = resolve(&entries, 50051, Duration::from_secs(1)).await;

        assert_eq!(
            set.addrs,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        assert!(!set.from_dns);
    }

    #[tokio::test]
    async fn test_empty() {
        let set = resolve(&[], 50051, Duration::from_secs(1)).await;
        assert!(set.is_empty());
    }
}
