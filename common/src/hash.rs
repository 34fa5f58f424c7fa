//! Injectable hash functions.

use ethereum_types::H256;
use sha2::{Digest, Sha256};

/// A hash function producing 32-byte digests. Trees take one of these at
/// construction so that their commitments match whichever verifier consumes
/// them.
pub type HashFn = fn(&[u8]) -> H256;

/// Keccak-256, the default for every tree in this workspace.
pub fn keccak256(data: &[u8]) -> H256 {
    keccak_hash::keccak(data)
}

/// SHA-256.
pub fn sha256(data: &[u8]) -> H256 {
    H256(Sha256::digest(data).into())
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            keccak256(b"abc").0,
            hex!("4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45")
        );
        assert_eq!(
            sha256(b"abc").0,
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }
}
