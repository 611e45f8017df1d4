//! Clock and id helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a post id: decimal milliseconds, a dash, and 8 lowercase hex
/// digits from the per-thread CSPRNG. Unique with overwhelming probability
/// within one node.
pub fn new_post_id() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{:08x}", now_ms(), suffix)
}
