//! Node lifecycle: storage open, accept loop, per-connection workers and
//! graceful, idempotent stop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::common::{Config, Result};
use crate::node::store::{KvStore, RocksStore};
use crate::node::{handlers, rpc, NodeState};

/// A running node. Dropping it without [`Node::stop`] leaves the accept loop
/// to die with the runtime.
pub struct Node {
    state: Arc<NodeState>,
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl Node {
    /// Open the RocksDB store at `cfg.db_path` (auto-created) and start
    /// serving.
    pub async fn start(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        std::fs::create_dir_all(&cfg.db_path)?;
        let store = RocksStore::open(&cfg.db_path)?;
        Self::start_with_store(cfg, Box::new(store)).await
    }

    /// Start with an injected storage engine.
    pub async fn start_with_store(cfg: Config, store: Box<dyn KvStore>) -> Result<Self> {
        cfg.validate()?;
        let state = NodeState::new(cfg, store);

        let listener = TcpListener::bind(("0.0.0.0", state.cfg.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(
            node = %state.cfg.node_id,
            listen = %local_addr,
            db_path = %state.cfg.db_path.display(),
            single_node = state.cfg.single_node,
            cluster_nodes = %state.cfg.cluster_nodes,
            "node listening"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(state.clone(), listener, stop_rx));

        Ok(Self { state, local_addr, stop_tx, accept_task: Some(accept_task) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, release the listener and join the accept worker plus
    /// every in-flight connection worker, so storage is released once the
    /// node is dropped. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.accept_task.take() {
            if task.await.is_err() {
                warn!(node = %self.state.cfg.node_id, "accept loop did not shut down cleanly");
            }
            info!(node = %self.state.cfg.node_id, "node stopped");
        }
    }
}

async fn accept_loop(state: Arc<NodeState>, listener: TcpListener, mut stop_rx: watch::Receiver<bool>) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A dropped sender also ends the loop.
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        // One short-lived worker per connection; the socket
                        // closes when the worker returns.
                        workers.spawn(async move {
                            handle_connection(state, stream, peer).await;
                        });
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                }
            }
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }

    // Refuse new connections, then drain in-flight workers so the caller of
    // `stop` knows storage has no users left once the accept task joins.
    drop(listener);
    while workers.join_next().await.is_some() {}
    debug!(node = %state.cfg.node_id, "accept loop stopped");
}

async fn handle_connection(state: Arc<NodeState>, mut stream: TcpStream, peer: SocketAddr) {
    match rpc::read_request(&mut stream).await {
        Ok(request) => {
            let response = handlers::dispatch(&state, request).await;
            if let Err(error) = rpc::write_response(&mut stream, &response).await {
                debug!(%peer, %error, "response write failed");
            }
        }
        Err(error) => {
            // Malformed framing gets no response; just drop the connection.
            debug!(%peer, %error, "request rejected");
        }
    }
}
