use ethereum_types::{H256, U256};
use rollup_common::HashFn;

/// Returns `left || right`.
pub(crate) fn join(left: &H256, right: &H256) -> Vec<u8> {
    [left.as_bytes(), right.as_bytes()].concat()
}

/// Returns `hash(left || right)`.
pub fn hash_pair(hash_fn: HashFn, left: &H256, right: &H256) -> H256 {
    hash_fn(&join(left, right))
}

/// Hashes `node` with its sibling at `level`, placing each on the side
/// selected by bit `level` of `key`. Concatenation is always
/// `left || right`.
pub(crate) fn hash_with_sibling(
    hash_fn: HashFn,
    key: U256,
    level: usize,
    node: &H256,
    sibling: &H256,
) -> (H256, Vec<u8>) {
    let body = if key.bit(level) {
        join(sibling, node)
    } else {
        join(node, sibling)
    };
    (hash_fn(&body), body)
}

/// Splits a stored inner node body back into its children.
pub(crate) fn split(body: &[u8]) -> Option<(H256, H256)> {
    (body.len() == 64).then(|| (H256::from_slice(&body[..32]), H256::from_slice(&body[32..])))
}

/// The empty-subtree hashes `Z[0..=height]`: `Z[0] = hash(empty leaf)`,
/// `Z[i] = hash(Z[i-1] || Z[i-1])`. `Z[height]` is the empty-tree root.
pub fn zero_hashes(height: usize, empty_leaf: &[u8], hash_fn: HashFn) -> Vec<H256> {
    let mut hashes = Vec::with_capacity(height + 1);
    hashes.push(hash_fn(empty_leaf));
    for level in 1..=height {
        let below = hashes[level - 1];
        hashes.push(hash_pair(hash_fn, &below, &below));
    }
    hashes
}

/// Reverses the low `height` bits of `key`.
///
/// With leaf-to-root proofs, bit `i` of a key selects the side at level `i`
/// counted from the leaves. Verifiers that walk root-to-leaf consume the path
/// most significant step first, which is this reversal.
pub fn reverse_path(key: U256, height: usize) -> U256 {
    (0..height)
        .filter(|&i| key.bit(i))
        .fold(U256::zero(), |acc, i| acc | (U256::one() << (height - 1 - i)))
}
