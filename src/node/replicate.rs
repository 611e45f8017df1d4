//! Replication and read coordination: all-required write fan-out,
//! first-success parallel reads, live-owner selection and the time-budgeted
//! title aggregation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::warn;

use crate::common::{form, owner_weight};
use crate::node::cluster::NodeDescriptor;
use crate::node::data::{self, Post, PostSummary};
use crate::node::rpc::{self, RpcReply};
use crate::node::NodeState;

/// Number of owners that must acknowledge a post create.
pub const REPLICAS: usize = 2;

/// `status == 200 && ok=1`: the acknowledgement test used by replication and
/// first-success reads.
fn reply_ok(reply: &RpcReply) -> bool {
    reply.status == 200 && form::parse(reply.body.as_bytes()).get("ok").map(String::as_str) == Some("1")
}

/// One outbound call with an explicit deadline (`None` → the default RPC
/// deadline). Every RPC path carries a deadline; none are optional.
pub async fn call(
    state: &NodeState,
    node: &NodeDescriptor,
    path: &str,
    body: &str,
    deadline: Option<Duration>,
) -> RpcReply {
    let deadline = deadline.unwrap_or_else(|| state.cfg.rpc_timeout());
    rpc::post(&node.host, node.port, path, body, deadline).await
}

/// Is this peer reachable right now? Answers from the liveness cache when a
/// fresh entry exists, otherwise probes `/internal/ping` and records the
/// outcome. Self and single-node mode short-circuit to alive.
pub async fn probe_alive(state: &Arc<NodeState>, node: &NodeDescriptor) -> bool {
    if state.cfg.single_node || state.is_self(node) {
        return true;
    }
    if let Some(cached) = state.liveness.lookup(node) {
        return cached;
    }

    let reply = call(state, node, "/internal/ping", "", Some(state.cfg.alive_probe_timeout())).await;
    let alive = reply_ok(&reply);
    state.liveness.store(node, alive);
    alive
}

/// All members ranked for a post id: descending FNV-1a weight over
/// `post_id|node_id`, ascending node id on ties. Single-node mode ranks only
/// this node.
pub fn ranked_owners(state: &NodeState, post_id: &str) -> Vec<NodeDescriptor> {
    if state.cfg.single_node {
        return vec![state.self_descriptor()];
    }
    let mut nodes = state.nodes.clone();
    nodes.sort_by(|a, b| {
        owner_weight(post_id, &b.id)
            .cmp(&owner_weight(post_id, &a.id))
            .then_with(|| a.id.cmp(&b.id))
    });
    nodes
}

/// The ranking restricted to peers that answer a parallel liveness probe,
/// rank order preserved.
pub async fn live_owners(state: &Arc<NodeState>, post_id: &str) -> Vec<NodeDescriptor> {
    let ranked = ranked_owners(state, post_id);
    if state.cfg.single_node {
        return ranked;
    }

    let probes: Vec<_> = ranked
        .iter()
        .map(|node| {
            let state = state.clone();
            let node = node.clone();
            tokio::spawn(async move { probe_alive(&state, &node).await })
        })
        .collect();

    let mut alive = Vec::with_capacity(ranked.len());
    for (node, probe) in ranked.into_iter().zip(probes) {
        if probe.await.unwrap_or(false) {
            alive.push(node);
        }
    }
    alive
}

/// Push a body to every peer in parallel; every peer must acknowledge.
/// Returns false as soon as the join finds any failed replica.
pub async fn replicate_to_all(state: &Arc<NodeState>, path: &'static str, body: String) -> bool {
    let mut workers = JoinSet::new();
    for node in state.peers() {
        let state = state.clone();
        let body = body.clone();
        workers.spawn(async move {
            let reply = call(&state, &node, path, &body, None).await;
            let ok = reply_ok(&reply);
            state.liveness.store(&node, ok);
            if !ok {
                warn!(peer = %node.endpoint(), path, "replica push failed");
            }
            ok
        });
    }

    let mut all_ok = true;
    while let Some(result) = workers.join_next().await {
        all_ok &= result.unwrap_or(false);
    }
    all_ok
}

/// Write a post to its chosen owners in parallel, if-absent on each. The
/// self-owner writes locally; remote owners get `/internal/post/put`. Every
/// owner must acknowledge, and an existing row anywhere counts as failure.
pub async fn replicate_post(state: &Arc<NodeState>, post: &Post, owners: &[NodeDescriptor]) -> bool {
    let created_at = post.created_at.to_string();
    let body = form::build(&[
        ("id", post.id.as_str()),
        ("account_id", post.account_id.as_str()),
        ("title", post.title.as_str()),
        ("content", post.content.as_str()),
        ("created_at", created_at.as_str()),
        ("if_absent", "1"),
    ]);

    let mut workers = JoinSet::new();
    for node in owners.iter().cloned() {
        let state = state.clone();
        let post = post.clone();
        let body = body.clone();
        workers.spawn(async move {
            if state.is_self(&node) {
                return state
                    .with_store(|store| data::put_post(store, &post, true))
                    .unwrap_or(false);
            }
            let reply = call(&state, &node, "/internal/post/put", &body, None).await;
            let ok = reply_ok(&reply);
            state.liveness.store(&node, ok);
            ok
        });
    }

    let mut all_ok = true;
    while let Some(result) = workers.join_next().await {
        all_ok &= result.unwrap_or(false);
    }
    all_ok
}

/// Race the same read against every target; the first acknowledged response
/// body wins, late successes are discarded.
pub async fn first_success(
    state: &Arc<NodeState>,
    targets: Vec<NodeDescriptor>,
    path: &'static str,
    body: String,
    deadline: Duration,
) -> Option<String> {
    let found = Arc::new(AtomicBool::new(false));
    let winner: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let mut workers = JoinSet::new();
    for node in targets {
        let state = state.clone();
        let body = body.clone();
        let found = found.clone();
        let winner = winner.clone();
        workers.spawn(async move {
            if found.load(Ordering::Relaxed) {
                return;
            }
            let reply = call(&state, &node, path, &body, Some(deadline)).await;
            let ok = reply_ok(&reply);
            state.liveness.store(&node, ok);
            if !ok {
                return;
            }
            if found
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *winner.lock().unwrap() = Some(reply.body);
            }
        });
    }
    while workers.join_next().await.is_some() {}

    let mut winner = winner.lock().unwrap();
    winner.take()
}

/// Fan `/internal/post/titles` out to every peer under the shared wall-clock
/// budget and merge into `merged` by id, keeping the greater `created_at` on
/// collision. Workers that find the budget spent exit without merging.
pub async fn merge_remote_titles(
    state: &Arc<NodeState>,
    limit: usize,
    merged: HashMap<String, PostSummary>,
) -> HashMap<String, PostSummary> {
    let per_peer_limit = limit.min(state.cfg.list_titles_remote_per_peer_limit).max(1);
    let remote_timeout = state.cfg.titles_remote_timeout();
    let budget_ms = state.cfg.list_titles_remote_budget_ms;
    let deadline = Instant::now() + Duration::from_millis(budget_ms);

    let merged = Arc::new(Mutex::new(merged));
    let body = form::build(&[("limit", per_peer_limit.to_string().as_str())]);

    let mut workers = JoinSet::new();
    for node in state.peers() {
        let state = state.clone();
        let body = body.clone();
        let merged = merged.clone();
        workers.spawn(async move {
            if budget_ms > 0 && Instant::now() >= deadline {
                return;
            }

            let reply = call(&state, &node, "/internal/post/titles", &body, Some(remote_timeout)).await;
            // The titles vote counts any well-formed response as liveness.
            let ok = reply.status == 200;
            state.liveness.store(&node, ok);
            if !ok {
                return;
            }
            if budget_ms > 0 && Instant::now() >= deadline {
                return;
            }

            let fields = form::parse(reply.body.as_bytes());
            if fields.get("ok").map(String::as_str) != Some("1") {
                return;
            }
            let count: usize = fields.get("count").and_then(|c| c.parse().ok()).unwrap_or(0);

            let mut merged = merged.lock().unwrap();
            for i in 0..count {
                let Some(id) = fields.get(&format!("id{i}")).filter(|id| !id.is_empty()) else {
                    continue;
                };
                let summary = PostSummary {
                    id: id.clone(),
                    account_id: fields.get(&format!("account_id{i}")).cloned().unwrap_or_default(),
                    title: fields.get(&format!("title{i}")).cloned().unwrap_or_default(),
                    created_at: fields
                        .get(&format!("created_at{i}"))
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                };
                match merged.get(id.as_str()) {
                    Some(existing) if summary.created_at <= existing.created_at => {}
                    _ => {
                        merged.insert(summary.id.clone(), summary);
                    }
                }
            }
        });
    }
    while workers.join_next().await.is_some() {}

    let mut merged = merged.lock().unwrap();
    std::mem::take(&mut *merged)
}
