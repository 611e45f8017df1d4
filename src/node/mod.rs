//! The replicated key-value node: storage, cluster plumbing, request
//! handling and lifecycle.

pub mod cluster;
pub mod data;
pub mod handlers;
pub mod replicate;
pub mod rpc;
pub mod server;
pub mod store;

use std::sync::{Arc, Mutex};

use crate::common::Config;
use cluster::{cluster_members, LivenessCache, NodeDescriptor};
use store::KvStore;

pub use server::Node;

/// Shared state behind every handler: configuration, the static member list,
/// the storage engine behind its process-wide mutex, and the liveness cache.
pub struct NodeState {
    pub cfg: Config,
    pub nodes: Vec<NodeDescriptor>,
    store: Mutex<Box<dyn KvStore>>,
    pub liveness: LivenessCache,
}

impl NodeState {
    pub fn new(cfg: Config, store: Box<dyn KvStore>) -> Arc<Self> {
        let nodes = cluster_members(&cfg);
        let liveness = LivenessCache::new(cfg.alive_cache_ms, cfg.dead_cache_ms);
        Arc::new(Self { cfg, nodes, store: Mutex::new(store), liveness })
    }

    /// Run a closure against the engine under the storage mutex. The closure
    /// cannot await, so the lock never spans a suspension point.
    pub fn with_store<T>(&self, f: impl FnOnce(&dyn KvStore) -> T) -> T {
        let guard = self.store.lock().unwrap();
        f(guard.as_ref())
    }

    pub fn is_self(&self, node: &NodeDescriptor) -> bool {
        node.id == self.cfg.node_id
    }

    pub fn self_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: self.cfg.node_id.clone(),
            host: "127.0.0.1".to_string(),
            port: self.cfg.port,
        }
    }

    /// Every member except this node.
    pub fn peers(&self) -> Vec<NodeDescriptor> {
        self.nodes.iter().filter(|n| !self.is_self(n)).cloned().collect()
    }
}
