//! Merkle interval trees.
//!
//! A Merkle interval tree commits to leaves that each carry an `index`, the
//! lower bound of the range the leaf covers. Leaves must be sorted by index,
//! and combining two siblings requires `left.index < right.index`; a parent
//! inherits the index of its left child. Because the same check runs during
//! verification, an inclusion proof also proves an upper bound for the
//! leaf's range: the index of the first sibling that sits to its right.
//!
//! The crate provides:
//! - [`MerkleIntervalTree`], the generic tree over [`IntervalTreeNode`]s;
//! - [`StateIntervalTree`], whose leaves are byte ranges with a payload;
//! - [`AssetIntervalTree`], a two-level composite with one range tree per
//!   asset and an index tree over the per-asset roots.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod asset_tree;
pub mod node;
pub mod state_tree;
pub mod tree;

use thiserror::Error;

pub use asset_tree::{AssetInclusionProof, AssetIntervalTree, ASSET_INDEX_WIDTH};
pub use node::IntervalTreeNode;
pub use state_tree::{RangeLeaf, StateIntervalTree, RANGE_INDEX_WIDTH};
pub use tree::MerkleIntervalTree;

/// Stores the result of interval tree operations. Returns an
/// [`IntervalTreeError`] upon failure.
pub type IntervalTreeResult<T> = Result<T, IntervalTreeError>;

/// An error type for interval tree operations.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum IntervalTreeError {
    /// Two siblings were combined with `left.index >= right.index`.
    #[error(
        "Left index (0x{}) not less than right index (0x{})",
        hex::encode(.left),
        hex::encode(.right)
    )]
    OrderingViolation { left: Vec<u8>, right: Vec<u8> },

    /// A tree needs at least one leaf.
    #[error("Cannot build an interval tree without leaves")]
    EmptyTree,

    #[error("Leaf position {position} is out of range for {leaves} leaves")]
    PositionOutOfRange { position: usize, leaves: usize },

    /// An inclusion proof folded up to a different root.
    #[error(
        "Computed root 0x{} does not match the expected root 0x{}",
        hex::encode(.computed),
        hex::encode(.expected)
    )]
    RootMismatch { computed: Vec<u8>, expected: Vec<u8> },

    /// A range leaf claims to extend past the start of its right neighbour.
    #[error("Range end {end} exceeds the max {max} for its inclusion proof")]
    RangeExceedsMax { end: u128, max: u128 },

    #[error("Range start {start} is greater than its end {end}")]
    InvalidRange { start: u128, end: u128 },

    /// A node index does not have the width its tree uses.
    #[error("Expected a {expected}-byte index, got {actual} bytes")]
    MalformedIndex { expected: usize, actual: usize },

    #[error("Asset {0:?} has no leaves in this tree")]
    UnknownAsset(ethereum_types::Address),
}
