//! A two-level interval tree: one range tree per asset, and an index tree
//! over the per-asset roots keyed by asset address.

use std::collections::BTreeMap;

use ethereum_types::Address;
use rollup_common::HashFn;
use serde::{Deserialize, Serialize};

use crate::node::IntervalTreeNode;
use crate::state_tree::{decode_index, RangeLeaf, StateIntervalTree};
use crate::tree::MerkleIntervalTree;
use crate::{IntervalTreeError, IntervalTreeResult};

/// Width of an asset-tree index, the asset's address.
pub const ASSET_INDEX_WIDTH: usize = 20;

/// Proof that a range leaf belongs to an asset's subtree, and that subtree to
/// the committed root.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AssetInclusionProof {
    pub asset: Address,
    /// Position of the leaf in the asset's subtree.
    pub leaf_position: usize,
    pub range_proof: Vec<IntervalTreeNode>,
    /// Position of the asset in the index tree.
    pub asset_position: usize,
    pub asset_proof: Vec<IntervalTreeNode>,
}

#[derive(Clone, Debug)]
pub struct AssetIntervalTree {
    subtrees: BTreeMap<Address, StateIntervalTree>,
    tree: MerkleIntervalTree,
}

impl AssetIntervalTree {
    /// Buckets `leaves` per asset, sorts every bucket by `start` and commits
    /// to the per-asset roots in asset order.
    pub fn new(leaves: Vec<(Address, RangeLeaf)>, hash_fn: HashFn) -> IntervalTreeResult<Self> {
        let mut buckets = BTreeMap::<Address, Vec<RangeLeaf>>::new();
        for (asset, leaf) in leaves {
            buckets.entry(asset).or_default().push(leaf);
        }

        let mut subtrees = BTreeMap::new();
        for (asset, mut bucket) in buckets {
            bucket.sort_by_key(|leaf| leaf.start);
            subtrees.insert(asset, StateIntervalTree::new(bucket, hash_fn)?);
        }

        let asset_nodes = subtrees
            .iter()
            .map(|(asset, subtree)| asset_node(asset, subtree.root()))
            .collect();
        let tree = MerkleIntervalTree::new(asset_nodes, hash_fn)?;

        Ok(Self { subtrees, tree })
    }

    pub fn root(&self) -> &IntervalTreeNode {
        self.tree.root()
    }

    /// Assets with at least one leaf, in index order.
    pub fn assets(&self) -> impl Iterator<Item = &Address> {
        self.subtrees.keys()
    }

    /// An asset's leaves, sorted by `start`.
    pub fn leaves(&self, asset: &Address) -> Option<&[RangeLeaf]> {
        self.subtrees.get(asset).map(|subtree| subtree.leaves())
    }

    /// Proof for the leaf at `position` of `asset`'s sorted leaves.
    pub fn inclusion_proof(
        &self,
        asset: &Address,
        position: usize,
    ) -> IntervalTreeResult<AssetInclusionProof> {
        let (asset_position, subtree) = self
            .subtrees
            .iter()
            .enumerate()
            .find_map(|(i, (a, subtree))| (a == asset).then_some((i, subtree)))
            .ok_or(IntervalTreeError::UnknownAsset(*asset))?;

        Ok(AssetInclusionProof {
            asset: *asset,
            leaf_position: position,
            range_proof: subtree.inclusion_proof(position)?,
            asset_position,
            asset_proof: self.tree.inclusion_proof(asset_position)?,
        })
    }

    /// Checks `leaf` against `root_hash` through both levels. The leaf's end
    /// is bounded by the next range of the same asset.
    pub fn verify(
        leaf: &RangeLeaf,
        proof: &AssetInclusionProof,
        root_hash: &[u8],
        hash_fn: HashFn,
    ) -> IntervalTreeResult<()> {
        leaf.check()?;

        let (subtree_root, upper_bound) = MerkleIntervalTree::compute_root(
            &leaf.node(hash_fn),
            &proof.range_proof,
            proof.leaf_position,
            hash_fn,
        )?;
        if let Some(index) = upper_bound {
            let max = decode_index(&index)?;
            if leaf.end > max {
                return Err(IntervalTreeError::RangeExceedsMax { end: leaf.end, max });
            }
        }

        MerkleIntervalTree::verify(
            &asset_node(&proof.asset, &subtree_root),
            &proof.asset_proof,
            proof.asset_position,
            root_hash,
            hash_fn,
        )?;
        Ok(())
    }
}

fn asset_node(asset: &Address, subtree_root: &IntervalTreeNode) -> IntervalTreeNode {
    IntervalTreeNode::new(subtree_root.hash.clone(), asset.as_bytes())
}
