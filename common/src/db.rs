//! Byte-oriented key/value storage.
//!
//! Every component that persists state does so through [`KvStore`]. A single
//! physical store is shared between components by handing each of them a
//! [`Bucket`], a view that transparently prepends a namespace prefix to every
//! key. Two components must never be given the same prefix; this is a
//! convention enforced by the prefix constants of each component, not by the
//! store.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Stores the result of store operations. Returns a [`DbError`] upon failure.
pub type DbResult<T> = Result<T, DbError>;

/// An error type for store operations.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum DbError {
    /// The backing store failed to service the request.
    #[error("Store backend failure: {0}")]
    Backend(String),

    /// A value read back from the store could not be interpreted.
    #[error("Corrupted entry under key 0x{}: {reason}", hex::encode(.key))]
    Corrupted {
        /// The (unprefixed) key of the offending entry.
        key: Vec<u8>,
        /// What was wrong with it.
        reason: String,
    },
}

impl DbError {
    /// Convenience constructor for [`DbError::Corrupted`].
    pub fn corrupted(key: &[u8], reason: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.to_vec(),
            reason: reason.into(),
        }
    }
}

/// A single write in a [`KvStore::batch`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum BatchOp {
    /// Insert or overwrite `key`.
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Remove `key` if present.
    Del { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.as_ref().to_vec(),
            value: value.into(),
        }
    }

    pub fn del(key: impl AsRef<[u8]>) -> Self {
        Self::Del {
            key: key.as_ref().to_vec(),
        }
    }

    fn with_prefix(self, prefix: &[u8]) -> Self {
        match self {
            BatchOp::Put { key, value } => BatchOp::Put {
                key: [prefix, &key].concat(),
                value,
            },
            BatchOp::Del { key } => BatchOp::Del {
                key: [prefix, &key].concat(),
            },
        }
    }
}

/// An ordered byte store.
pub trait KvStore: Debug + Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, overwriting any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn del(&self, key: &[u8]) -> DbResult<()>;

    /// Applies all `ops` atomically.
    fn batch(&self, ops: Vec<BatchOp>) -> DbResult<()>;

    /// Returns every entry with `start <= key < end` in key order. An `end`
    /// of `None` leaves the range unbounded.
    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Returns `true` if a value is stored under `key`.
    fn has(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        (**self).put(key, value)
    }

    fn del(&self, key: &[u8]) -> DbResult<()> {
        (**self).del(key)
    }

    fn batch(&self, ops: Vec<BatchOp>) -> DbResult<()> {
        (**self).batch(ops)
    }

    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).iter_range(start, end)
    }
}

/// In-memory [`KvStore`] backed by a [`BTreeMap`].
#[derive(Debug, Default)]
pub struct MemoryDb {
    db: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across every bucket.
    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

impl KvStore for MemoryDb {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.db.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> DbResult<()> {
        self.db.write().remove(key);
        Ok(())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> DbResult<()> {
        let mut db = self.db.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    db.insert(key, value);
                }
                BatchOp::Del { key } => {
                    db.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let upper = match end {
            // `BTreeMap::range` panics on inverted bounds.
            Some(end) if end <= start => return Ok(Vec::new()),
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(self
            .db
            .read()
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// A prefix-namespaced view over a shared store.
#[derive(Clone, Debug)]
pub struct Bucket {
    store: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl Bucket {
    pub fn new(store: Arc<dyn KvStore>, prefix: &[u8]) -> Self {
        Self {
            store,
            prefix: prefix.to_vec(),
        }
    }

    /// Creates a nested bucket whose prefix is this bucket's prefix followed
    /// by `prefix`.
    pub fn bucket(&self, prefix: &[u8]) -> Self {
        Self {
            store: self.store.clone(),
            prefix: [&self.prefix, prefix].concat(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        [&self.prefix, key].concat()
    }
}

impl KvStore for Bucket {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.store.get(&self.full_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.store.put(&self.full_key(key), value)
    }

    fn del(&self, key: &[u8]) -> DbResult<()> {
        self.store.del(&self.full_key(key))
    }

    fn batch(&self, ops: Vec<BatchOp>) -> DbResult<()> {
        self.store.batch(
            ops.into_iter()
                .map(|op| op.with_prefix(&self.prefix))
                .collect(),
        )
    }

    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = self.full_key(start);
        let end = match end {
            Some(end) => Some(self.full_key(end)),
            None => prefix_successor(&self.prefix),
        };
        let entries = self.store.iter_range(&start, end.as_deref())?;
        Ok(entries
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_vec(), v))
            .collect())
    }
}

/// Hands out [`Bucket`]s over a shared store.
pub trait KvStoreExt {
    fn bucket(&self, prefix: &[u8]) -> Bucket;
}

impl KvStoreExt for Arc<dyn KvStore> {
    fn bucket(&self, prefix: &[u8]) -> Bucket {
        Bucket::new(self.clone(), prefix)
    }
}

/// The smallest key that is greater than every key starting with `prefix`,
/// or `None` if no such key exists (empty or all-`0xff` prefix).
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last < u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}
