//! Property-based tests using proptest.

use crate::harness::ScriptedAdmin;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use vsp_crawler::{Crawler, CrawlerConfig, Ipv4Cidr};
use vsp_network::types::{PubKeyHash, VersionInfo};
use vsp_network::wire::{WireMessage, WireVersion};
use vsp_network::{Message, ServiceSet, ServiceType};

const ALL_SERVICES: [ServiceType; 5] = [
    ServiceType::Wallet,
    ServiceType::Miner,
    ServiceType::BlockchainFull,
    ServiceType::BlockchainSimple,
    ServiceType::Netzwerkrouting,
];

fn arb_services() -> impl Strategy<Value = ServiceSet> {
    prop::sample::subsequence(ALL_SERVICES.to_vec(), 0..=5)
        .prop_map(|services| services.into_iter().collect())
}

fn arb_endpoint() -> impl Strategy<Value = SocketAddr> {
    let ip = prop_oneof![
        any::<[u8; 4]>().prop_map(|o| IpAddr::V4(Ipv4Addr::from(o))),
        any::<[u8; 16]>().prop_map(|o| IpAddr::V6(Ipv6Addr::from(o))),
    ];
    (ip, 1u16..=u16::MAX).prop_map(|(ip, port)| SocketAddr::new(ip, port))
}

fn arb_version_info() -> impl Strategy<Value = VersionInfo> {
    ("v[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}", arb_services(), arb_endpoint()).prop_map(
        |(version, services, listening_endpoint)| VersionInfo {
            version,
            services,
            listening_endpoint,
        },
    )
}

proptest! {
    /// VersionInfo survives the wire mapping unchanged.
    #[test]
    fn version_info_wire_roundtrip(info in arb_version_info()) {
        let wire = WireVersion::from(&info);
        prop_assert_eq!(VersionInfo::try_from(wire).unwrap(), info.clone());

        // And through the JSON the frames actually carry.
        let message = WireMessage::from(&Message::Version(info.clone()));
        let json = serde_json::to_vec(&message).unwrap();
        let decoded: WireMessage = serde_json::from_slice(&json).unwrap();
        prop_assert_eq!(Message::try_from(decoded).unwrap(), Message::Version(info));
    }

    /// A public key hash is the first 20 bytes of SHA256(SHA256(key)).
    #[test]
    fn pub_key_hash_is_truncated_double_sha256(
        body in prop::collection::vec(any::<u8>(), 32),
        odd in any::<bool>(),
    ) {
        let mut key = [0u8; 33];
        key[0] = if odd { 0x03 } else { 0x02 };
        key[1..].copy_from_slice(&body);

        let digest = Sha256::digest(Sha256::digest(key));
        prop_assert_eq!(&PubKeyHash::from_public_key(&key).0[..], &digest[..20]);
    }

    /// Publishing picks a sorted set of distinct known peers.
    #[test]
    fn publish_subset_is_sorted_and_distinct(count in 1usize..12, subset in 1usize..8) {
        let mut config = CrawlerConfig::new("127.0.0.1:50052", 50051, Duration::from_secs(60));
        config.subset_size = subset;
        let crawler = Crawler::new(config, ScriptedAdmin::new());

        let now = Instant::now();
        let known: Vec<Ipv4Addr> = (0..count).map(|i| Ipv4Addr::new(10, 0, 1, i as u8)).collect();
        for ip in &known {
            crawler.peers().insert_new(*ip, 50051, now);
            crawler.peers().mark_known(*ip, now);
        }

        let (ips, _) = crawler.select();
        prop_assert_eq!(ips.len(), count.min(subset));
        prop_assert!(ips.iter().all(|ip| known.contains(ip)));
        let strings: Vec<String> = ips.iter().map(|ip| ip.to_string()).collect();
        let mut sorted = strings.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted, strings);
    }

    /// Debug IPs are distinct and inside the range.
    #[test]
    fn debug_ips_distinct_within_cidr(
        base in any::<[u8; 4]>(),
        prefix in 20u8..=32,
        count in 0usize..40,
        seed in any::<u64>(),
    ) {
        let cidr = Ipv4Cidr::new(Ipv4Addr::from(base), prefix);
        let ips = cidr.random_ips(&mut StdRng::seed_from_u64(seed), count);

        prop_assert_eq!(ips.len() as u64, (count as u64).min(cidr.size()));
        prop_assert!(ips.iter().all(|ip| cidr.contains(*ip)));
        prop_assert_eq!(ips.iter().collect::<HashSet<_>>().len(), ips.len());
    }
}

#[test]
fn service_codes_round_trip() {
    let codes = [
        (4, ServiceType::Netzwerkrouting, "netzwerkrouting"),
        (2, ServiceType::BlockchainFull, "blockchain_full"),
        (3, ServiceType::BlockchainSimple, "blockchain_simple"),
        (0, ServiceType::Wallet, "wallet"),
        (1, ServiceType::Miner, "miner"),
    ];
    for (code, service, name) in codes {
        assert_eq!(ServiceType::from_code(code), Some(service));
        assert_eq!(service.code(), code);
        assert_eq!(service.as_str(), name);
        assert_eq!(name.parse::<ServiceType>().unwrap(), service);
    }
    assert_eq!(ServiceType::from_code(5), None);
    assert_eq!(ServiceType::from_code(-1), None);
}
