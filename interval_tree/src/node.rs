use rollup_common::HashFn;
use serde::{Deserialize, Serialize};

use crate::{IntervalTreeError, IntervalTreeResult};

/// A node of a [`MerkleIntervalTree`][crate::MerkleIntervalTree].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct IntervalTreeNode {
    pub hash: Vec<u8>,
    /// Fixed-width, big-endian lower bound of the range under this node.
    pub index: Vec<u8>,
}

impl IntervalTreeNode {
    pub fn new(hash: impl Into<Vec<u8>>, index: impl Into<Vec<u8>>) -> Self {
        Self {
            hash: hash.into(),
            index: index.into(),
        }
    }

    /// The serialized node, `hash || index`.
    pub fn data(&self) -> Vec<u8> {
        [self.hash.as_slice(), self.index.as_slice()].concat()
    }

    /// Padding for the last node of an odd-length level: a zero hash and the
    /// maximum index of the given width, so it always sorts after any real
    /// node.
    pub fn empty_leaf(index_width: usize) -> Self {
        Self {
            hash: vec![0; 32],
            index: vec![u8::MAX; index_width],
        }
    }

    /// Combines two siblings. Fails if `left.index >= right.index`.
    pub fn parent(left: &Self, right: &Self, hash_fn: HashFn) -> IntervalTreeResult<Self> {
        if left.index >= right.index {
            return Err(IntervalTreeError::OrderingViolation {
                left: left.index.clone(),
                right: right.index.clone(),
            });
        }
        let hash = hash_fn(&[left.data(), right.data()].concat());
        Ok(Self {
            hash: hash.as_bytes().to_vec(),
            index: left.index.clone(),
        })
    }
}
