//! Topology loading and self-cluster discovery (C1).
//!
//! The wire format is the original tool's `adjacentList.json`: an object
//! keyed by cluster name, each value carrying an `adjacentList` (peer LB
//! addresses) and an `internalList` (this cluster's own LB address under
//! `cluster_lb`, plus `web0`, `web1`, ... backend addresses).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Command;

use fedlb_core::error::StartupError;
use fedlb_core::{Backend, Peer};
use ipnet::Ipv4Net;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    #[serde(rename = "adjacentList")]
    adjacent_list: BTreeMap<String, String>,
    #[serde(rename = "internalList")]
    internal_list: BTreeMap<String, String>,
}

/// The parsed topology document, keyed by cluster name.
pub type RawTopology = BTreeMap<String, ClusterEntry>;

/// Everything C1 hands off to the rest of the process once startup
/// succeeds.
#[derive(Debug, Clone)]
pub struct ResolvedTopology {
    pub own_address: String,
    pub peers: Vec<Peer>,
    pub backends: Vec<Backend>,
    /// Set only on the one LB for which `lastOctet(own) - clusterNum == 2`;
    /// this matches the source's `firstRecievedIP`/`leaderLB` heuristic,
    /// which both variables alias to the same address under the same
    /// condition (§9 of the design notes).
    pub first_hop_address: Option<String>,
    pub is_leader: bool,
}

/// Read and parse the topology file. IO and JSON errors both become fatal
/// startup errors carrying the offending path.
pub fn load_topology(path: &Path) -> Result<RawTopology, StartupError> {
    let text = std::fs::read_to_string(path).map_err(|source| StartupError::TopologyIo {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| StartupError::TopologyParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Resolve the raw topology against this process's identity, producing the
/// ordered peer/backend lists and first-hop/leader derivation (§4.1, §9).
pub fn resolve(
    clusters: &RawTopology,
    own_address: &str,
    cluster_num: i64,
    path: &Path,
) -> Result<ResolvedTopology, StartupError> {
    let own_cluster = clusters
        .values()
        .find(|entry| entry.internal_list.get("cluster_lb").map(String::as_str) == Some(own_address))
        .ok_or_else(|| StartupError::SelfNotFound {
            address: own_address.to_string(),
            path: path.display().to_string(),
        })?;

    let mut peer_addrs: Vec<String> = own_cluster.adjacent_list.values().cloned().collect();
    peer_addrs.sort_by_key(|addr| last_octet(addr));

    let mut backend_addrs: Vec<String> = own_cluster
        .internal_list
        .iter()
        .filter(|(key, _)| key.starts_with("web"))
        .map(|(_, addr)| addr.clone())
        .collect();
    backend_addrs.sort_by_key(|addr| last_octet(addr));

    let peers = peer_addrs
        .into_iter()
        .enumerate()
        .map(|(id, addr)| Peer::new(id, addr))
        .collect();
    let backends = backend_addrs
        .into_iter()
        .enumerate()
        .map(|(id, addr)| Backend::new(id, addr))
        .collect();

    let (first_hop_address, is_leader) = derive_first_hop(own_address, cluster_num);

    info!(
        own_address,
        cluster_num,
        is_leader,
        first_hop_address = first_hop_address.as_deref().unwrap_or("<none>"),
        "topology resolved"
    );

    Ok(ResolvedTopology {
        own_address: own_address.to_string(),
        peers,
        backends,
        first_hop_address,
        is_leader,
    })
}

/// `lastOctet(own) - clusterNum == 2` identifies the one LB that doubles as
/// both the federation's rendezvous leader and the well-known first-hop
/// address every LB compares `X-Original-LB` against. Preserved verbatim
/// from the source rather than redesigned, per the design notes.
fn derive_first_hop(own_address: &str, cluster_num: i64) -> (Option<String>, bool) {
    if last_octet(own_address) - cluster_num as i32 == 2 {
        (Some(own_address.to_string()), true)
    } else {
        (None, false)
    }
}

fn last_octet(ip: &str) -> i32 {
    ip.rsplit('.')
        .next()
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(-1)
}

const PRIVATE_V4_RANGES: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

fn is_private_ipv4(ip: &str) -> bool {
    let Ok(addr) = ip.parse::<Ipv4Addr>() else {
        return false;
    };
    PRIVATE_V4_RANGES
        .iter()
        .filter_map(|s| s.parse::<Ipv4Net>().ok())
        .any(|net| net.contains(&addr))
}

/// Discover this host's own address by shelling out to `hostname -i`
/// (mirroring the source) and taking the first RFC 1918 candidate.
pub fn discover_self_address() -> Result<String, StartupError> {
    let output = Command::new("hostname").arg("-i").output().map_err(|e| {
        StartupError::InvalidArg {
            name: "self-addr",
            reason: format!("failed to run `hostname -i`: {e}"),
        }
    })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let chosen = stdout
        .split_whitespace()
        .find(|candidate| is_private_ipv4(candidate))
        .map(str::to_string);

    match chosen {
        Some(addr) => {
            debug!(address = %addr, "self address discovered via hostname -i");
            Ok(addr)
        }
        None => Err(StartupError::InvalidArg {
            name: "self-addr",
            reason: "no private IPv4 address found in `hostname -i` output".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
    {
        "clusterA": {
            "adjacentList": { "b": "10.0.0.12", "c": "10.0.0.13" },
            "internalList": { "cluster_lb": "10.0.0.11", "web0": "10.0.1.21", "web1": "10.0.1.20" }
        },
        "clusterB": {
            "adjacentList": { "a": "10.0.0.11", "c": "10.0.0.13" },
            "internalList": { "cluster_lb": "10.0.0.12", "web0": "10.0.2.21" }
        }
    }
    "#;

    fn write_topology(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_and_resolves_own_cluster() {
        let file = write_topology(DOC);
        let raw = load_topology(file.path()).unwrap();
        let resolved = resolve(&raw, "10.0.0.11", 9, file.path()).unwrap();

        assert_eq!(resolved.own_address, "10.0.0.11");
        let peer_addrs: Vec<_> = resolved.peers.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(peer_addrs, vec!["10.0.0.12", "10.0.0.13"]);
        let backend_addrs: Vec<_> = resolved.backends.iter().map(|b| b.address.as_str()).collect();
        assert_eq!(backend_addrs, vec!["10.0.1.20", "10.0.1.21"]);
    }

    #[test]
    fn peer_and_backend_ids_are_ordinal_by_last_octet() {
        let file = write_topology(DOC);
        let raw = load_topology(file.path()).unwrap();
        let resolved = resolve(&raw, "10.0.0.11", 0, file.path()).unwrap();
        for (idx, p) in resolved.peers.iter().enumerate() {
            assert_eq!(p.id, idx);
        }
    }

    #[test]
    fn self_not_found_is_fatal() {
        let file = write_topology(DOC);
        let raw = load_topology(file.path()).unwrap();
        let err = resolve(&raw, "10.0.0.99", 0, file.path()).unwrap_err();
        assert!(matches!(err, StartupError::SelfNotFound { .. }));
    }

    #[test]
    fn malformed_json_is_fatal() {
        let file = write_topology("{ not json");
        let err = load_topology(file.path()).unwrap_err();
        assert!(matches!(err, StartupError::TopologyParse { .. }));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_topology(Path::new("/nonexistent/path/topology.json")).unwrap_err();
        assert!(matches!(err, StartupError::TopologyIo { .. }));
    }

    #[test]
    fn first_hop_and_leader_derivation() {
        // last octet 11, clusterNum 9 -> 11 - 9 == 2 -> this LB is the leader.
        let (first_hop, leader) = derive_first_hop("10.0.0.11", 9);
        assert_eq!(first_hop.as_deref(), Some("10.0.0.11"));
        assert!(leader);

        let (first_hop, leader) = derive_first_hop("10.0.0.11", 0);
        assert_eq!(first_hop, None);
        assert!(!leader);
    }

    #[test]
    fn private_ipv4_filter() {
        assert!(is_private_ipv4("10.0.0.5"));
        assert!(is_private_ipv4("172.16.4.4"));
        assert!(is_private_ipv4("192.168.1.1"));
        assert!(!is_private_ipv4("8.8.8.8"));
        assert!(!is_private_ipv4("not-an-ip"));
    }
}
