use ethereum_types::{H256, U256};
use rollup_common::{keccak256, BatchOp, DbError, HashFn, KvStore};
use thiserror::Error;
use tracing::trace;

use crate::proof::SparseMerkleProof;
use crate::utils::{hash_with_sibling, split, zero_hashes};

/// The value held by every key that was never set.
pub const EMPTY_LEAF: [u8; 32] = [0; 32];

/// Keys are at most 256 bits wide.
pub const MAX_HEIGHT: usize = 256;

/// Stores the result of tree operations. Returns a [`SmtError`] upon failure.
pub type SmtResult<T> = Result<T, SmtError>;

/// An error type for tree operations.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SmtError {
    /// The tree was constructed with a height outside `1..=MAX_HEIGHT`.
    #[error("Tree height must be in 1..={MAX_HEIGHT}, got {0}")]
    InvalidHeight(usize),

    /// A key does not fit in the tree's key space.
    #[error("Key {key} does not fit in a tree of height {height}")]
    KeyOutOfRange { key: U256, height: usize },

    /// A node needed to walk a path is not in the store. The store is
    /// incomplete for this root.
    #[error("Node {0:?} is missing from the store")]
    MissingNode(H256),

    /// A stored node body does not have the expected shape.
    #[error("Node {hash:?} has a malformed body of {len} bytes")]
    MalformedNode { hash: H256, len: usize },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Sparse Merkle tree (SMT).
///
/// Leaves sit at level 0 and the root at level `height`. Inner nodes are
/// persisted content-addressed, `hash -> left || right`, and leaves as
/// `hash(value) -> value`. Subtrees that hash to the precomputed zero hash of
/// their level are never read from the store.
#[derive(Debug)]
pub struct Smt<D: KvStore> {
    db: D,
    root: H256,
    height: usize,
    hash_fn: HashFn,
    zero_hashes: Vec<H256>,
}

/// The result of walking from the root down to a leaf.
struct PathWalk {
    /// Leaf-to-root.
    siblings: Vec<H256>,
    leaf_hash: H256,
}

impl<D: KvStore> Smt<D> {
    /// Opens a tree over `db`. Without a `root`, the canonical empty root for
    /// `height` is used.
    pub fn new(db: D, root: Option<H256>, height: usize, hash_fn: HashFn) -> SmtResult<Self> {
        if height == 0 || height > MAX_HEIGHT {
            return Err(SmtError::InvalidHeight(height));
        }
        let zero_hashes = zero_hashes(height, &EMPTY_LEAF, hash_fn);
        Ok(Self {
            db,
            root: root.unwrap_or(zero_hashes[height]),
            height,
            hash_fn,
            zero_hashes,
        })
    }

    /// Same as [`Smt::new`] with [`keccak256`].
    pub fn with_keccak(db: D, root: Option<H256>, height: usize) -> SmtResult<Self> {
        Self::new(db, root, height, keccak256)
    }

    pub const fn root(&self) -> H256 {
        self.root
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub const fn hash_fn(&self) -> HashFn {
        self.hash_fn
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    /// Hash of an all-empty subtree rooted at `level`, for levels up to the
    /// tree's height.
    pub fn zero_hash(&self, level: usize) -> Option<H256> {
        self.zero_hashes.get(level).copied()
    }

    /// Root of a tree with no leaves set.
    pub fn empty_root(&self) -> H256 {
        self.zero_hashes[self.height]
    }

    /// Sets `key` to `value`.
    ///
    /// Returns `false`, leaving the tree untouched, if a node on the path is
    /// missing from the store; a sibling is never fabricated.
    pub fn update(&mut self, key: U256, value: &[u8]) -> SmtResult<bool> {
        self.check_key(key)?;
        let walk = match self.walk(key) {
            Ok(walk) => walk,
            Err(SmtError::MissingNode(hash)) => {
                trace!("update of key {key} aborted: node {hash:?} is not in the store");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let mut node = (self.hash_fn)(value);
        let mut ops = Vec::with_capacity(self.height + 1);
        ops.push(BatchOp::put(node, value.to_vec()));
        for (level, sibling) in walk.siblings.iter().enumerate() {
            let (parent, body) = hash_with_sibling(self.hash_fn, key, level, &node, sibling);
            ops.push(BatchOp::put(parent, body));
            node = parent;
        }
        self.db.batch(ops)?;
        self.root = node;

        Ok(true)
    }

    /// Checks `proof` against this tree's root and, on success, persists
    /// every node on its path so later updates of neighboring keys find real
    /// siblings.
    pub fn verify_and_store(&self, proof: &SparseMerkleProof) -> SmtResult<bool> {
        if proof.siblings.len() != self.height || self.check_key(proof.key).is_err() {
            return Ok(false);
        }

        let mut node = (self.hash_fn)(&proof.value);
        let mut ops = Vec::with_capacity(self.height + 1);
        ops.push(BatchOp::put(node, proof.value.clone()));
        for (level, sibling) in proof.siblings.iter().enumerate() {
            let (parent, body) = hash_with_sibling(self.hash_fn, proof.key, level, &node, sibling);
            ops.push(BatchOp::put(parent, body));
            node = parent;
        }

        if node != self.root {
            return Ok(false);
        }
        self.db.batch(ops)?;

        Ok(true)
    }

    /// Builds a proof that `value` sits under `key`. Untouched subtrees
    /// contribute their zero hashes.
    pub fn get_merkle_proof(&self, key: U256, value: &[u8]) -> SmtResult<SparseMerkleProof> {
        self.check_key(key)?;
        let walk = self.walk(key)?;
        Ok(SparseMerkleProof {
            root_hash: self.root,
            key,
            value: value.to_vec(),
            siblings: walk.siblings,
        })
    }

    /// Returns the value set under `key`, or `None` if it holds the empty
    /// leaf.
    pub fn get_leaf(&self, key: U256) -> SmtResult<Option<Vec<u8>>> {
        self.check_key(key)?;
        let walk = self.walk(key)?;
        if walk.leaf_hash == self.zero_hashes[0] {
            return Ok(None);
        }
        self.db
            .get(walk.leaf_hash.as_bytes())?
            .map(Some)
            .ok_or(SmtError::MissingNode(walk.leaf_hash))
    }

    fn check_key(&self, key: U256) -> SmtResult<()> {
        if self.height < MAX_HEIGHT && key >> self.height != U256::zero() {
            return Err(SmtError::KeyOutOfRange {
                key,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Walks root to leaf collecting the siblings of the path to `key`.
    ///
    /// Once a node on the path equals the zero hash of its level the whole
    /// subtree below it is empty, so the walk stops reading the store and
    /// uses zero hashes for every remaining sibling.
    fn walk(&self, key: U256) -> SmtResult<PathWalk> {
        let mut siblings = vec![H256::zero(); self.height];
        let mut node = self.root;
        let mut use_zeros = false;

        for level in (1..=self.height).rev() {
            use_zeros = use_zeros || node == self.zero_hashes[level];
            let (left, right) = if use_zeros {
                (self.zero_hashes[level - 1], self.zero_hashes[level - 1])
            } else {
                self.children(node)?
            };

            let (next, sibling) = if key.bit(level - 1) {
                (right, left)
            } else {
                (left, right)
            };
            siblings[level - 1] = sibling;
            node = next;
        }

        Ok(PathWalk {
            siblings,
            leaf_hash: node,
        })
    }

    fn children(&self, hash: H256) -> SmtResult<(H256, H256)> {
        let body = self
            .db
            .get(hash.as_bytes())?
            .ok_or(SmtError::MissingNode(hash))?;
        split(&body).ok_or(SmtError::MalformedNode {
            hash,
            len: body.len(),
        })
    }
}
