use ethereum_types::H256;
use interval_tree::{IntervalTreeNode, IntervalTreeResult, MerkleIntervalTree};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use rollup_common::keccak256;
use serde::{Deserialize, Serialize};

use crate::transition::RollupTransition;

/// Width of a transition's index in the block tree, a big-endian `u32`.
pub const TRANSITION_INDEX_WIDTH: usize = 4;

/// An ordered batch of transitions.
///
/// A block commits to its transitions through a Merkle interval tree whose
/// leaves are `(keccak(rlp(transition)), transition_index)`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct RollupBlock {
    pub block_number: u64,
    pub transitions: Vec<RollupTransition>,
}

/// Where a transition sits in its block, with the siblings proving it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransitionInclusionProof {
    pub block_number: u64,
    pub transition_index: usize,
    pub siblings: Vec<IntervalTreeNode>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IncludedTransition {
    pub transition: RollupTransition,
    pub inclusion_proof: TransitionInclusionProof,
}

impl RollupBlock {
    pub const fn new(block_number: u64) -> Self {
        Self {
            block_number,
            transitions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn transition_leaf(
        transition_index: usize,
        transition: &RollupTransition,
    ) -> IntervalTreeNode {
        IntervalTreeNode::new(
            keccak256(&rlp::encode(transition)).as_bytes(),
            (transition_index as u32).to_be_bytes(),
        )
    }

    /// Fails with [`IntervalTreeError::EmptyTree`] for a block without
    /// transitions.
    ///
    /// [`IntervalTreeError::EmptyTree`]: interval_tree::IntervalTreeError::EmptyTree
    pub fn merkle_tree(&self) -> IntervalTreeResult<MerkleIntervalTree> {
        let leaves = self
            .transitions
            .iter()
            .enumerate()
            .map(|(i, t)| Self::transition_leaf(i, t))
            .collect();
        MerkleIntervalTree::new(leaves, keccak256)
    }

    /// The block's commitment.
    pub fn root(&self) -> IntervalTreeResult<H256> {
        Ok(H256::from_slice(&self.merkle_tree()?.root().hash))
    }

    pub fn included_transition(
        &self,
        transition_index: usize,
    ) -> IntervalTreeResult<IncludedTransition> {
        let tree = self.merkle_tree()?;
        let siblings = tree.inclusion_proof(transition_index)?;
        Ok(IncludedTransition {
            transition: self.transitions[transition_index].clone(),
            inclusion_proof: TransitionInclusionProof {
                block_number: self.block_number,
                transition_index,
                siblings,
            },
        })
    }
}

impl IncludedTransition {
    /// Checks the transition against a block root.
    pub fn verify(&self, block_root: &H256) -> IntervalTreeResult<()> {
        let proof = &self.inclusion_proof;
        MerkleIntervalTree::verify(
            &RollupBlock::transition_leaf(proof.transition_index, &self.transition),
            &proof.siblings,
            proof.transition_index,
            block_root.as_bytes(),
            keccak256,
        )?;
        Ok(())
    }
}

impl Encodable for RollupBlock {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2).append(&self.block_number);
        s.append_list::<RollupTransition, _>(&self.transitions);
    }
}

impl Decodable for RollupBlock {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            block_number: rlp.val_at(0)?,
            transitions: rlp.list_at(1)?,
        })
    }
}
