//! Hosts file rendering and publication.

use crate::error::{CrawlerError, CrawlerResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::seq::index;
use rand::Rng;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the published addresses came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostsSource {
    KnownPeers,
    Bootstrap,
    BootstrapEndpoints,
    DebugRandom,
}

impl HostsSource {
    pub fn tag(self) -> &'static str {
        match self {
            HostsSource::KnownPeers => "known-peers",
            HostsSource::Bootstrap => "bootstrap",
            HostsSource::BootstrapEndpoints => "bootstrap+endpoints",
            HostsSource::DebugRandom => "debug-random",
        }
    }
}

impl std::fmt::Display for HostsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// DNS names every published IP is mapped to.
#[derive(Debug, Clone)]
pub struct HostsLayout {
    pub service_name: String,
    pub namespace: String,
    pub zone: String,
}

impl HostsLayout {
    pub fn new(
        service_name: impl Into<String>,
        namespace: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            namespace: namespace.into(),
            zone: zone.into(),
        }
    }

    /// Render the file body: two comment lines, then one line per IP.
    pub fn render(&self, ips: &[Ipv4Addr], source: HostsSource, generated: DateTime<Utc>) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# generated {}\n",
            generated.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push_str(&format!("# source {}\n", source));
        for ip in ips {
            out.push_str(&format!(
                "{ip} {svc}.{zone}. {svc}.{ns}.{zone}.\n",
                ip = ip,
                svc = self.service_name,
                ns = self.namespace,
                zone = self.zone,
            ));
        }
        out
    }
}

/// Replace `path` with `contents` through `<path>.tmp` and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> CrawlerResult<()> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Build a range; host bits of `addr` are cleared and `prefix` is capped at 32.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask(prefix));
        Self { network, prefix }
    }

    fn mask(prefix: u8) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the range.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix) == u32::from(self.network)
    }

    /// Up to `count` distinct addresses drawn uniformly from the range, sorted.
    pub fn random_ips<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Vec<Ipv4Addr> {
        let size = usize::try_from(self.size()).unwrap_or(usize::MAX);
        let amount = count.min(size);
        let base = u32::from(self.network);
        let mut ips: Vec<Ipv4Addr> = index::sample(rng, size, amount)
            .into_iter()
            .map(|offset| Ipv4Addr::from(base.wrapping_add(offset as u32)))
            .collect();
        ips.sort_by_key(|ip| ip.to_string());
        ips
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| CrawlerError::Config(format!("missing prefix in CIDR {:?}", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| CrawlerError::Config(format!("bad CIDR address {:?}: {}", s, e)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| CrawlerError::Config(format!("bad CIDR prefix {:?}: {}", s, e)))?;
        if prefix > 32 {
            return Err(CrawlerError::Config(format!("CIDR prefix above 32: {:?}", s)));
        }
        Ok(Self::new(addr, prefix))
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn layout() -> HostsLayout {
        HostsLayout::new("miner-seed", "vsp-blockchain", "seed.local")
    }

    #[test]
    fn test_render() {
        let generated = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let body = layout().render(
            &[Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
            HostsSource::KnownPeers,
            generated,
        );
        let expected = "# generated 2024-05-01T12:00:00Z\n\
                        # source known-peers\n\
                        10.0.0.1 miner-seed.seed.local. miner-seed.vsp-blockchain.seed.local.\n\
                        10.0.0.2 miner-seed.seed.local. miner-seed.vsp-blockchain.seed.local.\n";
        assert_eq!(body, expected);
    }

    #[test]
    fn test_render_empty_keeps_comments() {
        let body = layout().render(&[], HostsSource::Bootstrap, Utc::now());
        assert_eq!(body.lines().count(), 2);
        assert!(body.ends_with("# source bootstrap\n"));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        write_atomic(&path, "first\n").await.unwrap();
        write_atomic(&path, "second\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_cidr_parse() {
        let cidr: Ipv4Cidr = "10.1.2.3/16".parse().unwrap();
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(cidr.size(), 65536);
        assert_eq!(cidr.to_string(), "10.1.0.0/16");
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert_eq!("0.0.0.0/0".parse::<Ipv4Cidr>().unwrap().size(), 1 << 32);
    }

    #[test]
    fn test_random_ips_distinct_and_in_range() {
        let cidr: Ipv4Cidr = "192.168.7.0/29".parse().unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let ips = cidr.random_ips(&mut rng, 5);
        assert_eq!(ips.len(), 5);
        assert_eq!(ips.iter().collect::<HashSet<_>>().len(), 5);
        assert!(ips.iter().all(|ip| cidr.contains(*ip)));

        // Asking for more than the range holds yields the whole range.
        assert_eq!(cidr.random_ips(&mut rng, 100).len(), 8);
    }
}
