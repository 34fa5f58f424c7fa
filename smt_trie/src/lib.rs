//! A fixed-depth sparse Merkle tree over the key space `[0, 2^height)`.
//!
//! Unset keys hold the [`EMPTY_LEAF`][smt::EMPTY_LEAF]. The hash of an
//! all-empty subtree at each level is precomputed once per tree, which lets
//! the tree persist only the nodes that were actually touched: nodes are
//! stored content-addressed (`hash -> left || right`) in whatever
//! [`KvStore`][rollup_common::KvStore] the tree is given.
//!
//! Proof siblings are ordered leaf-to-root everywhere in this crate. The
//! root-to-leaf ordering an on-chain verifier expects is produced by
//! [`SparseMerkleProof::to_contract_proof`][proof::SparseMerkleProof::to_contract_proof].

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod proof;
pub mod smt;
#[cfg(test)]
mod smt_test;
pub mod utils;

pub use proof::{ContractMerkleProof, SparseMerkleProof};
pub use smt::{Smt, SmtError, SmtResult, EMPTY_LEAF};
