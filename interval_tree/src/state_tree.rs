//! Interval trees over explicit `[start, end)` ranges.

use rlp_derive::{RlpDecodable, RlpEncodable};
use rollup_common::HashFn;
use serde::{Deserialize, Serialize};

use crate::node::IntervalTreeNode;
use crate::tree::MerkleIntervalTree;
use crate::{IntervalTreeError, IntervalTreeResult};

/// Width of a range leaf's index, a big-endian `u128`.
pub const RANGE_INDEX_WIDTH: usize = 16;

/// A range `[start, end)` with an opaque payload.
#[derive(
    Clone, Debug, Default, Eq, Hash, PartialEq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct RangeLeaf {
    pub start: u128,
    pub end: u128,
    pub data: Vec<u8>,
}

impl RangeLeaf {
    pub fn new(start: u128, end: u128, data: impl Into<Vec<u8>>) -> Self {
        Self {
            start,
            end,
            data: data.into(),
        }
    }

    /// The tree node committing to this leaf.
    pub fn node(&self, hash_fn: HashFn) -> IntervalTreeNode {
        IntervalTreeNode::new(
            hash_fn(&rlp::encode(self)).as_bytes(),
            self.start.to_be_bytes(),
        )
    }

    pub(crate) fn check(&self) -> IntervalTreeResult<()> {
        if self.start > self.end {
            return Err(IntervalTreeError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

/// A [`MerkleIntervalTree`] whose leaves are [`RangeLeaf`]s.
#[derive(Clone, Debug)]
pub struct StateIntervalTree {
    leaves: Vec<RangeLeaf>,
    tree: MerkleIntervalTree,
}

impl StateIntervalTree {
    /// Builds the tree from leaves sorted by `start`.
    pub fn new(leaves: Vec<RangeLeaf>, hash_fn: HashFn) -> IntervalTreeResult<Self> {
        for leaf in &leaves {
            leaf.check()?;
        }
        let nodes = leaves.iter().map(|leaf| leaf.node(hash_fn)).collect();
        let tree = MerkleIntervalTree::new(nodes, hash_fn)?;
        Ok(Self { leaves, tree })
    }

    pub fn root(&self) -> &IntervalTreeNode {
        self.tree.root()
    }

    pub fn leaves(&self) -> &[RangeLeaf] {
        &self.leaves
    }

    pub fn inner(&self) -> &MerkleIntervalTree {
        &self.tree
    }

    pub fn inclusion_proof(&self, position: usize) -> IntervalTreeResult<Vec<IntervalTreeNode>> {
        self.tree.inclusion_proof(position)
    }

    /// Checks that `leaf` sits at `position` under `root_hash` and that its
    /// range stops at or before the start of whatever sits to its right.
    pub fn verify(
        leaf: &RangeLeaf,
        proof: &[IntervalTreeNode],
        position: usize,
        root_hash: &[u8],
        hash_fn: HashFn,
    ) -> IntervalTreeResult<()> {
        leaf.check()?;
        let upper_bound =
            MerkleIntervalTree::verify(&leaf.node(hash_fn), proof, position, root_hash, hash_fn)?;

        if let Some(index) = upper_bound {
            let max = decode_index(&index)?;
            if leaf.end > max {
                return Err(IntervalTreeError::RangeExceedsMax { end: leaf.end, max });
            }
        }
        Ok(())
    }
}

pub(crate) fn decode_index(index: &[u8]) -> IntervalTreeResult<u128> {
    let bytes = <[u8; RANGE_INDEX_WIDTH]>::try_from(index).map_err(|_| {
        IntervalTreeError::MalformedIndex {
            expected: RANGE_INDEX_WIDTH,
            actual: index.len(),
        }
    })?;
    Ok(u128::from_be_bytes(bytes))
}
