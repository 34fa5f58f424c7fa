use std::fmt::{self, Debug};

use rollup_common::HashFn;

use crate::node::IntervalTreeNode;
use crate::{IntervalTreeError, IntervalTreeResult};

/// A Merkle interval tree over leaves sorted by index.
///
/// `levels[0]` holds the leaves and the last level holds the root alone. Odd
/// levels are padded with [`IntervalTreeNode::empty_leaf`] before pairing so
/// every node on a proof path has a sibling.
#[derive(Clone)]
pub struct MerkleIntervalTree {
    levels: Vec<Vec<IntervalTreeNode>>,
    num_leaves: usize,
    hash_fn: HashFn,
}

impl Debug for MerkleIntervalTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleIntervalTree")
            .field("root", &self.root())
            .field("num_leaves", &self.num_leaves())
            .field("depth", &(self.levels.len() - 1))
            .finish()
    }
}

impl MerkleIntervalTree {
    /// Builds the tree bottom-up. Fails on an empty leaf set, on leaves whose
    /// indices differ in width, or as soon as two siblings are out of order.
    pub fn new(leaves: Vec<IntervalTreeNode>, hash_fn: HashFn) -> IntervalTreeResult<Self> {
        let index_width = leaves
            .first()
            .map(|leaf| leaf.index.len())
            .ok_or(IntervalTreeError::EmptyTree)?;
        if let Some(leaf) = leaves.iter().find(|leaf| leaf.index.len() != index_width) {
            return Err(IntervalTreeError::MalformedIndex {
                expected: index_width,
                actual: leaf.index.len(),
            });
        }
        let num_leaves = leaves.len();

        let mut levels = Vec::new();
        let mut level = leaves;
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                level.push(IntervalTreeNode::empty_leaf(index_width));
            }
            let next = level
                .chunks(2)
                .map(|pair| IntervalTreeNode::parent(&pair[0], &pair[1], hash_fn))
                .collect::<IntervalTreeResult<Vec<_>>>()?;
            levels.push(level);
            level = next;
        }
        levels.push(level);

        Ok(Self {
            levels,
            num_leaves,
            hash_fn,
        })
    }

    pub fn root(&self) -> &IntervalTreeNode {
        // The constructor guarantees a top level with exactly one node.
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn levels(&self) -> &[Vec<IntervalTreeNode>] {
        &self.levels
    }

    pub const fn hash_fn(&self) -> HashFn {
        self.hash_fn
    }

    /// Number of leaves, not counting padding.
    pub const fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn leaf(&self, position: usize) -> Option<&IntervalTreeNode> {
        self.levels[0].get(position)
    }

    /// Siblings of the leaf at `position`, leaf-to-root.
    pub fn inclusion_proof(&self, position: usize) -> IntervalTreeResult<Vec<IntervalTreeNode>> {
        let leaves = self.num_leaves();
        if position >= leaves {
            return Err(IntervalTreeError::PositionOutOfRange { position, leaves });
        }

        let mut proof = Vec::with_capacity(self.levels.len() - 1);
        let mut idx = position;
        for level in &self.levels[..self.levels.len() - 1] {
            proof.push(level[idx ^ 1].clone());
            idx /= 2;
        }
        Ok(proof)
    }

    /// Folds `leaf` up through `proof`, checking sibling order at every step.
    ///
    /// Also returns the index of the first sibling that sits to the right of
    /// the path, which bounds the leaf's range from above. `None` means the
    /// leaf is the rightmost one.
    pub fn compute_root(
        leaf: &IntervalTreeNode,
        proof: &[IntervalTreeNode],
        position: usize,
        hash_fn: HashFn,
    ) -> IntervalTreeResult<(IntervalTreeNode, Option<Vec<u8>>)> {
        if proof.len() < usize::BITS as usize && position >> proof.len() != 0 {
            return Err(IntervalTreeError::PositionOutOfRange {
                position,
                leaves: 1 << proof.len(),
            });
        }

        let mut node = leaf.clone();
        let mut upper_bound = None;
        for (depth, sibling) in proof.iter().enumerate() {
            node = if (position >> depth) & 1 == 0 {
                if upper_bound.is_none() {
                    upper_bound = Some(sibling.index.clone());
                }
                IntervalTreeNode::parent(&node, sibling, hash_fn)?
            } else {
                IntervalTreeNode::parent(sibling, &node, hash_fn)?
            };
        }
        Ok((node, upper_bound))
    }

    /// Checks that `leaf` sits at `position` under `root_hash` and returns
    /// its upper bound, see [`MerkleIntervalTree::compute_root`].
    pub fn verify(
        leaf: &IntervalTreeNode,
        proof: &[IntervalTreeNode],
        position: usize,
        root_hash: &[u8],
        hash_fn: HashFn,
    ) -> IntervalTreeResult<Option<Vec<u8>>> {
        let (root, upper_bound) = Self::compute_root(leaf, proof, position, hash_fn)?;
        if root.hash != root_hash {
            return Err(IntervalTreeError::RootMismatch {
                computed: root.hash,
                expected: root_hash.to_vec(),
            });
        }
        Ok(upper_bound)
    }
}
