//! Inclusion proofs for [`Smt`][crate::smt::Smt].

use ethereum_types::{H256, U256};
use rollup_common::HashFn;
use serde::{Deserialize, Serialize};

use crate::utils::{hash_with_sibling, reverse_path};

/// Proof that `value` sits under `key` in the tree with root `root_hash`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct SparseMerkleProof {
    pub root_hash: H256,
    pub key: U256,
    pub value: Vec<u8>,
    /// Exactly `height` hashes, leaf-to-root: `siblings[0]` is the sibling
    /// of the leaf, the last entry is a child of the root.
    pub siblings: Vec<H256>,
}

impl SparseMerkleProof {
    /// Height of the tree this proof was produced for.
    pub fn height(&self) -> usize {
        self.siblings.len()
    }

    /// Folds `hash(value)` up through the siblings.
    pub fn compute_root(&self, hash_fn: HashFn) -> H256 {
        self.siblings
            .iter()
            .enumerate()
            .fold(hash_fn(&self.value), |node, (level, sibling)| {
                hash_with_sibling(hash_fn, self.key, level, &node, sibling).0
            })
    }

    /// Returns `true` if the proof folds up to its own `root_hash`.
    pub fn verify(&self, hash_fn: HashFn) -> bool {
        self.compute_root(hash_fn) == self.root_hash
    }

    /// Converts to the ordering an on-chain verifier consumes.
    pub fn to_contract_proof(&self) -> ContractMerkleProof {
        ContractMerkleProof {
            root_hash: self.root_hash,
            path: reverse_path(self.key, self.height()),
            value: self.value.clone(),
            siblings: self.siblings.iter().rev().copied().collect(),
        }
    }
}

/// A [`SparseMerkleProof`] laid out for a root-to-leaf verifier.
///
/// `siblings[0]` is the child of the root and `path` holds the key with its
/// low `siblings.len()` bits reversed, so that the most significant bit of
/// `path` selects the side directly below the root.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ContractMerkleProof {
    pub root_hash: H256,
    pub path: U256,
    pub value: Vec<u8>,
    pub siblings: Vec<H256>,
}

impl ContractMerkleProof {
    pub fn into_proof(self) -> SparseMerkleProof {
        let height = self.siblings.len();
        SparseMerkleProof {
            root_hash: self.root_hash,
            key: reverse_path(self.path, height),
            value: self.value,
            siblings: self.siblings.into_iter().rev().collect(),
        }
    }
}
