//! # replikv
//!
//! A replicated, single-tier key-value node that stores accounts and posts
//! across a small static cluster. Each node persists its own copy in a local
//! RocksDB instance and cooperates with peers over a minimal
//! request/response protocol to replicate writes and serve reads that missed
//! locally.
//!
//! ```text
//!            client
//!              │ POST /account/*, /post/*
//!        ┌─────▼─────┐   /internal/*   ┌───────────┐
//!        │  node n1  │◄───────────────►│  node n2  │
//!        │ rocksdb   │                 │ rocksdb   │
//!        └─────┬─────┘                 └───────────┘
//!              │ owner-ranked fan-out / first-success reads
//!        ┌─────▼─────┐
//!        │  node n3  │
//!        └───────────┘
//! ```
//!
//! Accounts replicate to every node and every replica must acknowledge.
//! Posts replicate to exactly two owners chosen by a deterministic FNV-1a
//! ranking over `(post_id, node_id)` restricted to live peers. Reads fall
//! back to a parallel first-success fan-out; title listings aggregate peers
//! under a wall-clock budget.
//!
//! ## Consistency caveat
//!
//! Replication is fail-stop with no rollback: when an account create reaches
//! local storage but a replica push fails, the caller sees
//! `503 replicate_account` while the local row remains durable, so a later
//! read served by this node returns the row other nodes may not have. This
//! is intentional; recovery is out of scope.

pub mod common;
pub mod node;

pub use common::{Config, Error, Result};
pub use node::Node;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
