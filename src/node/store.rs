//! Storage engine abstraction.
//!
//! The embedded engine is an injected capability behind [`KvStore`] so the
//! replication core never sees engine types. [`RocksStore`] backs production;
//! [`MemStore`] is an ordered in-memory stand-in for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use crate::common::{Error, Result};

/// Column families of the node database. `Default` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Default,
    Account,
    Post,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Default => "default",
            Family::Account => "account",
            Family::Post => "post",
        }
    }

    fn index(self) -> usize {
        match self {
            Family::Default => 0,
            Family::Account => 1,
            Family::Post => 2,
        }
    }
}

const FAMILY_NAMES: [&str; 3] = ["default", "account", "post"];

/// One operation inside an atomic multi-key write.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { family: Family, key: Vec<u8>, value: Vec<u8> },
    Delete { family: Family, key: Vec<u8> },
}

/// Opaque ordered key→value engine with column families, point get, prefix
/// iteration and atomic multi-key batches.
pub trait KvStore: Send {
    fn get(&self, family: Family, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, family: Family, key: &[u8], value: &[u8]) -> Result<()>;

    /// Apply all operations atomically, across families.
    fn write(&self, batch: Vec<BatchOp>) -> Result<()>;

    /// Entries whose key starts with `prefix`, in ascending key order.
    /// `limit` 0 means unbounded.
    fn scan_prefix(&self, family: Family, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory store for tests.
pub struct MemStore {
    families: Mutex<[BTreeMap<Vec<u8>, Vec<u8>>; 3]>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            families: Mutex::new([BTreeMap::new(), BTreeMap::new(), BTreeMap::new()]),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemStore {
    fn get(&self, family: Family, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let families = self.families.lock().unwrap();
        Ok(families[family.index()].get(key).cloned())
    }

    fn put(&self, family: Family, key: &[u8], value: &[u8]) -> Result<()> {
        let mut families = self.families.lock().unwrap();
        families[family.index()].insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn write(&self, batch: Vec<BatchOp>) -> Result<()> {
        let mut families = self.families.lock().unwrap();
        for op in batch {
            match op {
                BatchOp::Put { family, key, value } => {
                    families[family.index()].insert(key, value);
                }
                BatchOp::Delete { family, key } => {
                    families[family.index()].remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, family: Family, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let families = self.families.lock().unwrap();
        let mut out = Vec::new();
        for (key, value) in families[family.index()].range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.clone(), value.clone()));
            if limit > 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

/// RocksDB-backed store.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create the database with the three required column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, FAMILY_NAMES)?;
        Ok(Self { db })
    }

    fn cf(&self, family: Family) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(family.name())
            .ok_or_else(|| Error::Corrupted(format!("missing column family {}", family.name())))
    }
}

impl KvStore for RocksStore {
    fn get(&self, family: Family, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(family)?, key)?)
    }

    fn put(&self, family: Family, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_cf(self.cf(family)?, key, value)?;
        Ok(())
    }

    fn write(&self, batch: Vec<BatchOp>) -> Result<()> {
        let mut wb = WriteBatch::default();
        for op in batch {
            match op {
                BatchOp::Put { family, key, value } => wb.put_cf(self.cf(family)?, key, value),
                BatchOp::Delete { family, key } => wb.delete_cf(self.cf(family)?, key),
            }
        }
        self.db.write(wb)?;
        Ok(())
    }

    fn scan_prefix(&self, family: Family, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let iter = self
            .db
            .iterator_cf(self.cf(family)?, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.into_vec(), value.into_vec()));
            if limit > 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
