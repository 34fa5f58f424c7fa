//! Plumbing shared by the rollup state crates.
//!
//! The authenticated structures never own their storage: they are handed a
//! [`KvStore`] (usually a [`Bucket`] carved out of a shared store) and an
//! injectable [`HashFn`] so that their proofs stay format compatible with an
//! external verifier.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

use ethereum_types::H256;

pub mod db;
pub mod hash;

pub use db::{BatchOp, Bucket, DbError, DbResult, KvStore, KvStoreExt, MemoryDb};
pub use hash::{keccak256, sha256, HashFn};

/// The keccak256 hash of an empty byte string.
/// 0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
pub const KECCAK_EMPTY: H256 = H256([
    197, 210, 70, 1, 134, 247, 35, 60, 146, 126, 125, 178, 220, 199, 3, 192, 229, 0, 182, 83, 202,
    130, 39, 59, 123, 250, 216, 4, 93, 133, 164, 112,
]);

#[test]
fn test_keccak_empty() {
    assert_eq!(KECCAK_EMPTY, keccak256(&[]));
}
