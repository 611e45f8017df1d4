//! Configuration for a replikv node.
//!
//! Every knob is environment-driven. `ENV_PATH` may name a dotenv-style file
//! whose entries fill in variables the process environment leaves unset; with
//! no `ENV_PATH`, `.env`, `../.env` and `../../.env` are tried in order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Floor applied when `rpc_timeout_ms` is configured as 0.
const FALLBACK_RPC_TIMEOUT_MS: u64 = 450;

#[derive(Debug, Clone)]
pub struct Config {
    /// Node ID (unique within the cluster descriptor)
    pub node_id: String,

    /// TCP listen port
    pub port: u16,

    /// Storage directory, opened with auto-create
    pub db_path: PathBuf,

    /// Static cluster descriptor: comma-separated `id@host:port` tokens
    pub cluster_nodes: String,

    /// Single-node mode ignores the descriptor entirely
    pub single_node: bool,

    /// Default deadline for outbound RPCs
    pub rpc_timeout_ms: u64,

    /// Deadline for remote fallback reads
    pub read_remote_timeout_ms: u64,

    /// Per-peer deadline inside the titles fan-out
    pub list_titles_remote_timeout_ms: u64,

    /// Wall-clock budget for the whole titles fan-out
    pub list_titles_remote_budget_ms: u64,

    /// Per-peer row cap inside the titles fan-out
    pub list_titles_remote_per_peer_limit: usize,

    /// Master switch for remote title aggregation
    pub list_titles_remote_enabled: bool,

    /// TTL for positive liveness cache entries (0 disables)
    pub alive_cache_ms: u64,

    /// TTL for negative liveness cache entries (0 disables)
    pub dead_cache_ms: u64,

    /// Deadline for explicit `/internal/ping` probes
    pub alive_probe_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "n1".to_string(),
            port: 4000,
            db_path: PathBuf::from("kvs/db"),
            cluster_nodes: "n1@127.0.0.1:4000".to_string(),
            single_node: false,
            rpc_timeout_ms: 450,
            read_remote_timeout_ms: 300,
            list_titles_remote_timeout_ms: 220,
            list_titles_remote_budget_ms: 350,
            list_titles_remote_per_peer_limit: 40,
            list_titles_remote_enabled: true,
            alive_cache_ms: 250,
            dead_cache_ms: 80,
            alive_probe_timeout_ms: 120,
        }
    }
}

impl Config {
    /// Load from the process environment, preloading `ENV_PATH` (or the
    /// `.env` fallback chain) for variables the environment leaves unset.
    pub fn load() -> Self {
        Self::load_with(None)
    }

    /// Like [`Config::load`], with an explicit env file overriding `ENV_PATH`.
    pub fn load_with(env_file: Option<PathBuf>) -> Self {
        let mut overlay = HashMap::new();

        let explicit = env_file.or_else(|| std::env::var("ENV_PATH").ok().filter(|p| !p.is_empty()).map(PathBuf::from));
        match explicit {
            Some(path) => load_env_file(&path, &mut overlay),
            None => {
                for path in [".env", "../.env", "../../.env"] {
                    load_env_file(Path::new(path), &mut overlay);
                }
            }
        }

        let env = |key: &str| -> Option<String> {
            std::env::var(key).ok().or_else(|| overlay.get(key).cloned())
        };

        let defaults = Config::default();
        Self {
            node_id: env("NODE_ID").unwrap_or(defaults.node_id),
            port: parse_or(env("KVS_PORT"), defaults.port),
            db_path: env("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            cluster_nodes: env("CLUSTER_NODES").unwrap_or(defaults.cluster_nodes),
            single_node: env("single_node")
                .as_deref()
                .map(parse_bool)
                .or_else(|| env("SINGLE_NODE").as_deref().map(parse_bool))
                .unwrap_or(defaults.single_node),
            rpc_timeout_ms: parse_or(env("KVS_RPC_TIMEOUT_MS"), defaults.rpc_timeout_ms),
            read_remote_timeout_ms: parse_or(env("KVS_READ_REMOTE_TIMEOUT_MS"), defaults.read_remote_timeout_ms),
            list_titles_remote_timeout_ms: parse_or(
                env("KVS_LIST_TITLES_REMOTE_TIMEOUT_MS"),
                defaults.list_titles_remote_timeout_ms,
            ),
            list_titles_remote_budget_ms: parse_or(
                env("KVS_LIST_TITLES_REMOTE_BUDGET_MS"),
                defaults.list_titles_remote_budget_ms,
            ),
            list_titles_remote_per_peer_limit: parse_or(
                env("KVS_LIST_TITLES_REMOTE_PER_PEER_LIMIT"),
                defaults.list_titles_remote_per_peer_limit,
            ),
            list_titles_remote_enabled: env("KVS_LIST_TITLES_REMOTE_ENABLED")
                .as_deref()
                .map(parse_bool)
                .unwrap_or(defaults.list_titles_remote_enabled),
            alive_cache_ms: parse_or(env("KVS_ALIVE_CACHE_MS"), defaults.alive_cache_ms),
            dead_cache_ms: parse_or(env("KVS_DEAD_CACHE_MS"), defaults.dead_cache_ms),
            alive_probe_timeout_ms: parse_or(env("KVS_ALIVE_PING_TIMEOUT_MS"), defaults.alive_probe_timeout_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig("node_id is required".into()));
        }
        Ok(())
    }

    /// Effective default RPC deadline; a configured 0 falls back to 450 ms.
    pub fn rpc_timeout(&self) -> Duration {
        let ms = if self.rpc_timeout_ms == 0 { FALLBACK_RPC_TIMEOUT_MS } else { self.rpc_timeout_ms };
        Duration::from_millis(ms)
    }

    /// Deadline for remote fallback reads; 0 falls back to the RPC deadline.
    pub fn read_remote_timeout(&self) -> Duration {
        self.timeout_or_rpc(self.read_remote_timeout_ms)
    }

    /// Per-peer deadline for the titles fan-out; 0 falls back to the RPC deadline.
    pub fn titles_remote_timeout(&self) -> Duration {
        self.timeout_or_rpc(self.list_titles_remote_timeout_ms)
    }

    /// Deadline for explicit liveness probes; 0 falls back to the RPC deadline.
    pub fn alive_probe_timeout(&self) -> Duration {
        self.timeout_or_rpc(self.alive_probe_timeout_ms)
    }

    fn timeout_or_rpc(&self, ms: u64) -> Duration {
        if ms == 0 {
            self.rpc_timeout()
        } else {
            Duration::from_millis(ms)
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn load_env_file(path: &Path, overlay: &mut HashMap<String, String>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for (key, value) in parse_env_file(&content) {
        overlay.entry(key).or_insert(value);
    }
}

/// Parse a dotenv-style file: `#` comments and blank lines are skipped, an
/// `export ` prefix is stripped, values may carry matching single or double
/// quotes.
fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").map(str::trim).unwrap_or(line);

        let Some(eq) = line.find('=') else {
            continue;
        };
        if eq == 0 {
            continue;
        }

        let key = line[..eq].trim();
        if key.is_empty() {
            continue;
        }

        let mut value = line[eq + 1..].trim();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
            {
                value = &value[1..value.len() - 1];
            }
        }
        entries.push((key.to_string(), value.to_string()));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.db_path, PathBuf::from("kvs/db"));
        assert_eq!(cfg.rpc_timeout_ms, 450);
        assert_eq!(cfg.read_remote_timeout_ms, 300);
        assert_eq!(cfg.alive_cache_ms, 250);
        assert_eq!(cfg.dead_cache_ms, 80);
        assert_eq!(cfg.alive_probe_timeout_ms, 120);
        assert!(cfg.list_titles_remote_enabled);
        assert!(!cfg.single_node);
    }

    #[test]
    fn zero_timeouts_fall_back() {
        let cfg = Config {
            rpc_timeout_ms: 0,
            read_remote_timeout_ms: 0,
            alive_probe_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(cfg.rpc_timeout(), Duration::from_millis(450));
        assert_eq!(cfg.read_remote_timeout(), Duration::from_millis(450));
        assert_eq!(cfg.alive_probe_timeout(), Duration::from_millis(450));

        let cfg = Config { rpc_timeout_ms: 200, read_remote_timeout_ms: 0, ..Config::default() };
        assert_eq!(cfg.read_remote_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn validate_rejects_empty_node_id() {
        let cfg = Config { node_id: String::new(), ..Config::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_file_parsing() {
        let entries = parse_env_file(
            "# comment\n\nexport NODE_ID=n7\nKVS_PORT = 4100\nDB_PATH=\"/tmp/a b\"\nEMPTY=''\n=broken\nnoequals\n",
        );
        assert_eq!(
            entries,
            vec![
                ("NODE_ID".to_string(), "n7".to_string()),
                ("KVS_PORT".to_string(), "4100".to_string()),
                ("DB_PATH".to_string(), "/tmp/a b".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn bool_parsing() {
        for v in ["1", "true", "YES", "On"] {
            assert!(parse_bool(v));
        }
        for v in ["0", "false", "off", ""] {
            assert!(!parse_bool(v));
        }
    }
}
