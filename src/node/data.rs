//! Local record storage: accounts, posts, and the post title index.
//!
//! Key layout: accounts live under `a:<id>` in the account family; posts keep
//! a primary row under `p:<id>` and a title projection under
//! `t:<13-digit reversed created_at>:<id>` in the post family. The fixed-width
//! reversed timestamp makes ascending key order equal descending `created_at`.

use std::collections::HashMap;

use crate::common::{form, Result};
use crate::node::store::{BatchOp, Family, KvStore};

/// Upper bound of indexable timestamps (13 decimal digits of milliseconds).
pub const MAX_INDEXED_TS: i64 = 9_999_999_999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub content: String,
    pub created_at: i64,
}

/// Title projection of a post: everything but the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub created_at: i64,
}

impl Account {
    pub fn to_form(&self) -> String {
        let created_at = self.created_at.to_string();
        form::build(&[
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("password_hash", self.password_hash.as_str()),
            ("created_at", created_at.as_str()),
        ])
    }

    /// `None` when the blob lacks an id.
    pub fn from_form(fields: &HashMap<String, String>) -> Option<Self> {
        let id = fields.get("id").cloned().unwrap_or_default();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id,
            name: fields.get("name").cloned().unwrap_or_default(),
            password_hash: fields.get("password_hash").cloned().unwrap_or_default(),
            created_at: parse_ts(fields.get("created_at")),
        })
    }
}

impl Post {
    pub fn to_form(&self) -> String {
        let created_at = self.created_at.to_string();
        form::build(&[
            ("id", self.id.as_str()),
            ("account_id", self.account_id.as_str()),
            ("title", self.title.as_str()),
            ("content", self.content.as_str()),
            ("created_at", created_at.as_str()),
        ])
    }

    pub fn from_form(fields: &HashMap<String, String>) -> Option<Self> {
        let id = fields.get("id").cloned().unwrap_or_default();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id,
            account_id: fields.get("account_id").cloned().unwrap_or_default(),
            title: fields.get("title").cloned().unwrap_or_default(),
            content: fields.get("content").cloned().unwrap_or_default(),
            created_at: parse_ts(fields.get("created_at")),
        })
    }

    pub fn summary(&self) -> PostSummary {
        PostSummary {
            id: self.id.clone(),
            account_id: self.account_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }
}

impl PostSummary {
    pub fn to_form(&self) -> String {
        let created_at = self.created_at.to_string();
        form::build(&[
            ("id", self.id.as_str()),
            ("account_id", self.account_id.as_str()),
            ("title", self.title.as_str()),
            ("created_at", created_at.as_str()),
        ])
    }

    pub fn from_form(fields: &HashMap<String, String>) -> Option<Self> {
        let id = fields.get("id").cloned().unwrap_or_default();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id,
            account_id: fields.get("account_id").cloned().unwrap_or_default(),
            title: fields.get("title").cloned().unwrap_or_default(),
            created_at: parse_ts(fields.get("created_at")),
        })
    }
}

fn parse_ts(value: Option<&String>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn account_key(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + id.len());
    key.extend_from_slice(b"a:");
    key.extend_from_slice(id.as_bytes());
    key
}

fn post_key(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + id.len());
    key.extend_from_slice(b"p:");
    key.extend_from_slice(id.as_bytes());
    key
}

/// Index key for the title projection. The timestamp is clamped into
/// `[0, MAX_INDEXED_TS]` and stored reversed and zero-padded so lexical order
/// realizes descending `created_at`, ascending id within ties.
pub fn title_index_key(created_at: i64, id: &str) -> Vec<u8> {
    let rev = MAX_INDEXED_TS - created_at.clamp(0, MAX_INDEXED_TS);
    format!("t:{:013}:{}", rev, id).into_bytes()
}

/// Comparator shared by local title lists and merged aggregation:
/// `created_at` descending, id descending within ties.
pub fn sort_summaries(items: &mut [PostSummary]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

/// Store an account. With `if_absent`, an existing row is left untouched and
/// `Ok(false)` is returned.
pub fn put_account(store: &dyn KvStore, account: &Account, if_absent: bool) -> Result<bool> {
    let key = account_key(&account.id);
    if if_absent && store.get(Family::Account, &key)?.is_some() {
        return Ok(false);
    }
    store.put(Family::Account, &key, account.to_form().as_bytes())?;
    Ok(true)
}

pub fn read_account(store: &dyn KvStore, id: &str) -> Result<Option<Account>> {
    let Some(value) = store.get(Family::Account, &account_key(id))? else {
        return Ok(None);
    };
    Ok(Account::from_form(&form::parse(&value)))
}

/// Raw key-presence check used by post creation.
pub fn account_exists(store: &dyn KvStore, id: &str) -> Result<bool> {
    Ok(store.get(Family::Account, &account_key(id))?.is_some())
}

/// Store a post together with its title index entry in one atomic batch.
///
/// With `if_absent`, an existing primary row returns `Ok(false)`. An
/// unconditional overwrite also deletes the stale index entry when the old
/// row's `(created_at, id)` differs.
pub fn put_post(store: &dyn KvStore, post: &Post, if_absent: bool) -> Result<bool> {
    let key = post_key(&post.id);

    let mut old: Option<Post> = None;
    if let Some(existing) = store.get(Family::Post, &key)? {
        if if_absent {
            return Ok(false);
        }
        old = Post::from_form(&form::parse(&existing));
    }

    let mut batch = vec![
        BatchOp::Put { family: Family::Post, key, value: post.to_form().into_bytes() },
        BatchOp::Put {
            family: Family::Post,
            key: title_index_key(post.created_at, &post.id),
            value: post.summary().to_form().into_bytes(),
        },
    ];
    if let Some(old) = old {
        if old.id != post.id || old.created_at != post.created_at {
            batch.push(BatchOp::Delete {
                family: Family::Post,
                key: title_index_key(old.created_at, &old.id),
            });
        }
    }

    store.write(batch)?;
    Ok(true)
}

pub fn read_post(store: &dyn KvStore, id: &str) -> Result<Option<Post>> {
    let Some(value) = store.get(Family::Post, &post_key(id))? else {
        return Ok(None);
    };
    Ok(Post::from_form(&form::parse(&value)))
}

/// Recency-ordered title projections from the local index, at most `limit`
/// entries (0 means unbounded).
///
/// When the index is empty but primary rows exist, the index is rebuilt from
/// a full primary scan in one atomic batch. The backfill is best-effort: a
/// failed batch is logged and the scanned rows are still returned.
pub fn local_titles(store: &dyn KvStore, limit: usize) -> Result<Vec<PostSummary>> {
    let mut indexed = Vec::new();
    for (_, value) in store.scan_prefix(Family::Post, b"t:", limit)? {
        if let Some(summary) = PostSummary::from_form(&form::parse(&value)) {
            indexed.push(summary);
        }
    }
    if !indexed.is_empty() {
        sort_summaries(&mut indexed);
        return Ok(indexed);
    }

    let mut scanned = Vec::new();
    for (_, value) in store.scan_prefix(Family::Post, b"p:", 0)? {
        if let Some(post) = Post::from_form(&form::parse(&value)) {
            scanned.push(post.summary());
        }
    }
    if scanned.is_empty() {
        return Ok(scanned);
    }

    let backfill = scanned
        .iter()
        .map(|summary| BatchOp::Put {
            family: Family::Post,
            key: title_index_key(summary.created_at, &summary.id),
            value: summary.to_form().into_bytes(),
        })
        .collect();
    if let Err(error) = store.write(backfill) {
        tracing::warn!(%error, posts = scanned.len(), "title index backfill failed; serving scan");
    } else {
        tracing::info!(posts = scanned.len(), "title index backfilled from primary rows");
    }

    sort_summaries(&mut scanned);
    if limit > 0 && scanned.len() > limit {
        scanned.truncate(limit);
    }
    Ok(scanned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::store::MemStore;

    fn post(id: &str, created_at: i64) -> Post {
        Post {
            id: id.to_string(),
            account_id: "acct".to_string(),
            title: format!("title-{id}"),
            content: format!("content-{id}"),
            created_at,
        }
    }

    #[test]
    fn title_key_orders_by_descending_timestamp() {
        let newer = title_index_key(2_000, "a");
        let older = title_index_key(1_000, "a");
        assert!(newer < older);

        // Ties order ascending by id in key space.
        let tie_a = title_index_key(1_000, "a");
        let tie_b = title_index_key(1_000, "b");
        assert!(tie_a < tie_b);
    }

    #[test]
    fn title_key_clamps_timestamp() {
        assert_eq!(title_index_key(-5, "x"), title_index_key(0, "x"));
        assert_eq!(
            title_index_key(MAX_INDEXED_TS + 1, "x"),
            title_index_key(MAX_INDEXED_TS, "x")
        );
        assert_eq!(title_index_key(0, "x"), b"t:9999999999999:x".to_vec());
        assert_eq!(title_index_key(MAX_INDEXED_TS, "x"), b"t:0000000000000:x".to_vec());
    }

    #[test]
    fn account_round_trip_and_if_absent() {
        let store = MemStore::new();
        let account = Account {
            id: "alice".to_string(),
            name: "Alice".to_string(),
            password_hash: String::new(),
            created_at: 42,
        };

        assert!(put_account(&store, &account, true).unwrap());
        assert_eq!(read_account(&store, "alice").unwrap().unwrap(), account);
        assert!(account_exists(&store, "alice").unwrap());
        assert!(!account_exists(&store, "bob").unwrap());

        let other = Account { name: "Imposter".to_string(), ..account.clone() };
        assert!(!put_account(&store, &other, true).unwrap());
        assert_eq!(read_account(&store, "alice").unwrap().unwrap().name, "Alice");

        // Unconditional replace is allowed for replica pushes.
        assert!(put_account(&store, &other, false).unwrap());
        assert_eq!(read_account(&store, "alice").unwrap().unwrap().name, "Imposter");
    }

    #[test]
    fn post_put_writes_exactly_one_index_entry() {
        let store = MemStore::new();
        assert!(put_post(&store, &post("p1", 1_000), true).unwrap());

        assert_eq!(read_post(&store, "p1").unwrap().unwrap().title, "title-p1");
        let index = store.scan_prefix(Family::Post, b"t:", 0).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].0, title_index_key(1_000, "p1"));
    }

    #[test]
    fn post_if_absent_conflicts() {
        let store = MemStore::new();
        assert!(put_post(&store, &post("p1", 1_000), true).unwrap());
        assert!(!put_post(&store, &post("p1", 2_000), true).unwrap());
        assert_eq!(read_post(&store, "p1").unwrap().unwrap().created_at, 1_000);
    }

    #[test]
    fn overwrite_removes_stale_index_entry() {
        let store = MemStore::new();
        assert!(put_post(&store, &post("p1", 1_000), false).unwrap());
        assert!(put_post(&store, &post("p1", 2_000), false).unwrap());

        let index = store.scan_prefix(Family::Post, b"t:", 0).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].0, title_index_key(2_000, "p1"));
    }

    #[test]
    fn overwrite_same_timestamp_keeps_single_entry() {
        let store = MemStore::new();
        assert!(put_post(&store, &post("p1", 1_000), false).unwrap());
        assert!(put_post(&store, &post("p1", 1_000), false).unwrap());
        assert_eq!(store.scan_prefix(Family::Post, b"t:", 0).unwrap().len(), 1);
    }

    #[test]
    fn titles_come_back_newest_first() {
        let store = MemStore::new();
        for (id, ts) in [("a", 1_000), ("b", 3_000), ("c", 2_000)] {
            put_post(&store, &post(id, ts), true).unwrap();
        }

        let titles = local_titles(&store, 0).unwrap();
        let ids: Vec<&str> = titles.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let limited = local_titles(&store, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, "b");
    }

    #[test]
    fn equal_timestamps_order_by_descending_id() {
        let store = MemStore::new();
        for id in ["a", "c", "b"] {
            put_post(&store, &post(id, 5_000), true).unwrap();
        }

        let titles = local_titles(&store, 0).unwrap();
        let ids: Vec<&str> = titles.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn missing_index_is_backfilled_from_primary_rows() {
        let store = MemStore::new();
        // Primary rows only, as if written before the index existed.
        for (id, ts) in [("a", 1_000), ("b", 2_000)] {
            let p = post(id, ts);
            store
                .put(Family::Post, format!("p:{id}").as_bytes(), p.to_form().as_bytes())
                .unwrap();
        }
        assert!(store.scan_prefix(Family::Post, b"t:", 0).unwrap().is_empty());

        let titles = local_titles(&store, 10).unwrap();
        let ids: Vec<&str> = titles.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        // The rebuilt index now serves subsequent reads.
        let index = store.scan_prefix(Family::Post, b"t:", 0).unwrap();
        assert_eq!(index.len(), 2);
        let again = local_titles(&store, 10).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].id, "b");
    }

    #[test]
    fn empty_store_lists_nothing() {
        let store = MemStore::new();
        assert!(local_titles(&store, 10).unwrap().is_empty());
    }
}
