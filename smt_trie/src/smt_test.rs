use ethereum_types::{H256, U256};
use rand::{thread_rng, Rng};
use rollup_common::{keccak256, sha256, MemoryDb};

use crate::smt::{Smt, SmtError, EMPTY_LEAF};
use crate::utils::hash_pair;

fn random_value() -> Vec<u8> {
    thread_rng().gen::<[u8; 32]>().to_vec()
}

#[test]
fn test_invalid_height() {
    assert_eq!(
        Smt::with_keccak(MemoryDb::new(), None, 0).unwrap_err(),
        SmtError::InvalidHeight(0)
    );
    assert_eq!(
        Smt::with_keccak(MemoryDb::new(), None, 257).unwrap_err(),
        SmtError::InvalidHeight(257)
    );
}

#[test]
fn test_empty_root_is_deterministic() {
    for height in [2, 3, 4] {
        let smt = Smt::with_keccak(MemoryDb::new(), None, height).unwrap();

        let mut z = vec![keccak256(&EMPTY_LEAF)];
        for i in 1..height {
            z.push(hash_pair(keccak256, &z[i - 1], &z[i - 1]));
        }
        let expected = hash_pair(keccak256, &z[height - 1], &z[height - 1]);
        assert_eq!(smt.root(), expected);
        assert_eq!(smt.empty_root(), expected);
        assert_eq!(smt.zero_hash(0), Some(z[0]));
        assert_eq!(smt.zero_hash(height), Some(expected));
        assert_eq!(smt.zero_hash(height + 1), None);

        for key in [U256::zero(), U256::one()] {
            assert_eq!(smt.get_leaf(key).unwrap(), None);
            let proof = smt.get_merkle_proof(key, &EMPTY_LEAF).unwrap();
            assert_eq!(proof.siblings, z);
            assert!(proof.verify(keccak256));
        }
    }
}

#[test]
fn test_update_and_get() {
    let mut smt = Smt::with_keccak(MemoryDb::new(), None, 8).unwrap();

    let v = random_value();
    assert!(smt.update(U256::from(5), &v).unwrap());
    assert_eq!(smt.get_leaf(U256::from(5)).unwrap(), Some(v));
    assert_eq!(smt.get_leaf(U256::from(4)).unwrap(), None);
    assert_ne!(smt.root(), smt.empty_root());
}

#[test]
fn test_update_is_order_independent() {
    let kvs = (0..32)
        .map(|i| (U256::from(i * 7 % 64), random_value()))
        .collect::<Vec<_>>();

    let mut forward = Smt::with_keccak(MemoryDb::new(), None, 6).unwrap();
    for (k, v) in &kvs {
        assert!(forward.update(*k, v).unwrap());
    }
    let mut backward = Smt::with_keccak(MemoryDb::new(), None, 6).unwrap();
    for (k, v) in kvs.iter().rev() {
        assert!(backward.update(*k, v).unwrap());
    }

    assert_eq!(forward.root(), backward.root());
}

#[test]
fn test_reset_to_empty_leaf_restores_empty_root() {
    let mut smt = Smt::with_keccak(MemoryDb::new(), None, 16).unwrap();
    let k = U256::from(1234);

    smt.update(k, &random_value()).unwrap();
    let root = smt.root();
    smt.update(k, &random_value()).unwrap();
    assert_ne!(smt.root(), root);

    smt.update(k, &EMPTY_LEAF).unwrap();
    assert_eq!(smt.root(), smt.empty_root());
    assert_eq!(smt.get_leaf(k).unwrap(), None);
}

#[test]
fn test_proof_round_trip() {
    let mut rng = thread_rng();
    for height in [1, 4, 20, 160, 256] {
        let mut smt = Smt::with_keccak(MemoryDb::new(), None, height).unwrap();
        let max = if height == 256 {
            U256::MAX
        } else {
            (U256::one() << height) - 1
        };

        let mut kvs = Vec::new();
        for _ in 0..16 {
            let key = U256(rng.gen()) & max;
            let value = random_value();
            assert!(smt.update(key, &value).unwrap());
            kvs.push((key, value));
        }

        // Only the last write to a key survives.
        let last_writes = kvs
            .iter()
            .rev()
            .fold(Vec::<(U256, Vec<u8>)>::new(), |mut acc, (k, v)| {
                if !acc.iter().any(|(seen, _)| seen == k) {
                    acc.push((*k, v.clone()));
                }
                acc
            });

        let verifier = Smt::with_keccak(MemoryDb::new(), Some(smt.root()), height).unwrap();
        for (key, value) in last_writes {
            let proof = smt.get_merkle_proof(key, &value).unwrap();
            assert!(proof.verify(keccak256));
            assert!(verifier.verify_and_store(&proof).unwrap());
        }
    }
}

#[test]
fn test_verify_and_store_rejects_bad_proofs() {
    let mut smt = Smt::with_keccak(MemoryDb::new(), None, 8).unwrap();
    let value = random_value();
    smt.update(U256::from(3), &value).unwrap();
    let proof = smt.get_merkle_proof(U256::from(3), &value).unwrap();

    let verifier = Smt::with_keccak(MemoryDb::new(), Some(smt.root()), 8).unwrap();

    let mut short = proof.clone();
    short.siblings.pop();
    assert!(!verifier.verify_and_store(&short).unwrap());

    let mut wrong_value = proof.clone();
    wrong_value.value = random_value();
    assert!(!verifier.verify_and_store(&wrong_value).unwrap());

    let mut wrong_key = proof.clone();
    wrong_key.key = U256::from(2);
    assert!(!verifier.verify_and_store(&wrong_key).unwrap());

    let mut out_of_range = proof;
    out_of_range.key = U256::from(256);
    assert!(!verifier.verify_and_store(&out_of_range).unwrap());

    assert!(verifier.db().is_empty());
}

#[test]
fn test_update_without_siblings_fails() {
    let mut smt = Smt::with_keccak(MemoryDb::new(), None, 8).unwrap();
    smt.update(U256::from(0), &random_value()).unwrap();
    smt.update(U256::from(200), &random_value()).unwrap();

    // Same root, but nothing backing it.
    let mut blind = Smt::with_keccak(MemoryDb::new(), Some(smt.root()), 8).unwrap();
    assert!(!blind.update(U256::from(1), &random_value()).unwrap());
    assert_eq!(blind.root(), smt.root());
    assert!(matches!(
        blind.get_leaf(U256::from(1)),
        Err(SmtError::MissingNode(_))
    ));
}

#[test]
fn test_verify_and_store_enables_neighbor_updates() {
    let height = 8;
    let mut source = Smt::with_keccak(MemoryDb::new(), None, height).unwrap();
    let v0 = random_value();
    source.update(U256::from(0), &v0).unwrap();

    let mut replica = Smt::with_keccak(MemoryDb::new(), Some(source.root()), height).unwrap();
    let proof = source.get_merkle_proof(U256::from(0), &v0).unwrap();
    assert!(replica.verify_and_store(&proof).unwrap());
    assert_eq!(replica.get_leaf(U256::from(0)).unwrap(), Some(v0));

    // The sibling leaf and everything to the right are empty, so the replica
    // can apply the same writes as the source.
    for key in [1u64, 2, 17, 255] {
        let v = random_value();
        assert!(source.update(U256::from(key), &v).unwrap());
        assert!(replica.update(U256::from(key), &v).unwrap());
        assert_eq!(replica.root(), source.root());
    }
}

#[test]
fn test_key_out_of_range() {
    let mut smt = Smt::with_keccak(MemoryDb::new(), None, 4).unwrap();
    assert_eq!(
        smt.update(U256::from(16), &random_value()).unwrap_err(),
        SmtError::KeyOutOfRange {
            key: U256::from(16),
            height: 4
        }
    );
    assert!(smt.update(U256::from(15), &random_value()).unwrap());
}

#[test]
fn test_hash_function_is_injected() {
    let mut keccak = Smt::with_keccak(MemoryDb::new(), None, 8).unwrap();
    let mut sha = Smt::new(MemoryDb::new(), None, 8, sha256).unwrap();
    assert_ne!(keccak.root(), sha.root());

    let v = random_value();
    keccak.update(U256::from(9), &v).unwrap();
    sha.update(U256::from(9), &v).unwrap();

    let proof = sha.get_merkle_proof(U256::from(9), &v).unwrap();
    assert!(proof.verify(sha256));
    assert!(!proof.verify(keccak256));
}

#[test]
fn test_contract_proof_transform() {
    let mut smt = Smt::with_keccak(MemoryDb::new(), None, 3).unwrap();
    let v = random_value();
    smt.update(U256::from(1), &v).unwrap();
    let proof = smt.get_merkle_proof(U256::from(1), &v).unwrap();

    let contract = proof.to_contract_proof();
    assert_eq!(contract.path, U256::from(4));
    assert_eq!(contract.siblings.first(), proof.siblings.last());
    assert_eq!(contract.siblings.last(), proof.siblings.first());
    assert_eq!(contract.into_proof(), proof);
}

#[test]
fn test_malformed_node_is_reported() {
    use rollup_common::KvStore;

    let db = MemoryDb::new();
    let root = H256::repeat_byte(7);
    db.put(root.as_bytes(), &[1, 2, 3]).unwrap();
    let smt = Smt::with_keccak(db, Some(root), 4).unwrap();

    assert_eq!(
        smt.get_leaf(U256::zero()).unwrap_err(),
        SmtError::MalformedNode { hash: root, len: 3 }
    );
}
