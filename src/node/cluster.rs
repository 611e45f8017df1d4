//! Static cluster membership and the peer liveness cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::common::Config;

/// One node of the static cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl NodeDescriptor {
    /// Cache key and log label: `id@host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.id, self.host, self.port)
    }
}

/// Parse a comma-separated `id@host:port` descriptor. Hosts may carry an
/// `http://` prefix and a trailing `/...` suffix, both stripped. Malformed
/// tokens are dropped silently.
pub fn parse_cluster(descriptor: &str) -> Vec<NodeDescriptor> {
    let mut nodes = Vec::new();

    for token in descriptor.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let Some((id, host_port)) = token.split_once('@') else {
            continue;
        };
        let id = id.trim();
        if id.is_empty() {
            continue;
        }

        let mut host_port = host_port.trim();
        host_port = host_port.strip_prefix("http://").unwrap_or(host_port);
        if let Some(slash) = host_port.find('/') {
            host_port = &host_port[..slash];
        }

        let Some((host, port)) = host_port.rsplit_once(':') else {
            continue;
        };
        if host.is_empty() {
            continue;
        }
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        if port == 0 {
            continue;
        }

        nodes.push(NodeDescriptor { id: id.to_string(), host: host.to_string(), port });
    }
    nodes
}

/// Resolve the full member list for a node. Single-node mode ignores the
/// descriptor; cluster mode appends a loopback self entry when the descriptor
/// lacks one.
pub fn cluster_members(cfg: &Config) -> Vec<NodeDescriptor> {
    let self_node = NodeDescriptor {
        id: cfg.node_id.clone(),
        host: "127.0.0.1".to_string(),
        port: cfg.port,
    };
    if cfg.single_node {
        return vec![self_node];
    }

    let mut nodes = parse_cluster(&cfg.cluster_nodes);
    if !nodes.iter().any(|n| n.id == cfg.node_id) {
        nodes.push(self_node);
    }
    nodes
}

struct LivenessEntry {
    alive: bool,
    expires_at: Instant,
}

/// TTL-bounded memoization of recent probe outcomes, with distinct TTLs for
/// positive and negative results. Entries are advisory only.
pub struct LivenessCache {
    alive_ttl: Duration,
    dead_ttl: Duration,
    entries: Mutex<HashMap<String, LivenessEntry>>,
}

impl LivenessCache {
    pub fn new(alive_ttl_ms: u64, dead_ttl_ms: u64) -> Self {
        Self {
            alive_ttl: Duration::from_millis(alive_ttl_ms),
            dead_ttl: Duration::from_millis(dead_ttl_ms),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached verdict for a peer, or `None` when unknown. A stale entry is
    /// evicted and reported unknown.
    pub fn lookup(&self, node: &NodeDescriptor) -> Option<bool> {
        let mut entries = self.entries.lock().unwrap();
        let key = node.endpoint();
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.alive),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Record an observed outcome. A zero TTL for the outcome's class makes
    /// this a no-op.
    pub fn store(&self, node: &NodeDescriptor, alive: bool) {
        let ttl = if alive { self.alive_ttl } else { self.dead_ttl };
        if ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        entries.insert(node.endpoint(), LivenessEntry { alive, expires_at: Instant::now() + ttl });
    }
}
