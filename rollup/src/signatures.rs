//! Message signing and signer recovery.
//!
//! The rollup only ever asks two questions of a signature scheme: who signed
//! these bytes, and please sign these bytes. Both are behind traits so the
//! state machine can run against real ECDSA signatures or, for tests and
//! trusted local replay, against signatures that simply name their signer.

use std::fmt::Debug;

use alloy::primitives::PrimitiveSignature;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use ethereum_types::Address;
use thiserror::Error;

pub type SignatureResult<T> = Result<T, SignatureError>;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SignatureError {
    #[error("Malformed signature of {len} bytes")]
    Malformed { len: usize },

    #[error("Could not recover a signer: {0}")]
    Recovery(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),
}

/// Recovers the address that signed a message.
pub trait SignatureVerifier: Debug + Send + Sync {
    fn verify_message(&self, message: &[u8], signature: &[u8]) -> SignatureResult<Address>;
}

/// Signs messages on behalf of a single address.
pub trait SignatureProvider: Debug + Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, message: &[u8]) -> SignatureResult<Vec<u8>>;
}

/// EIP-191 personal-message signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct EcdsaVerifier;

impl SignatureVerifier for EcdsaVerifier {
    fn verify_message(&self, message: &[u8], signature: &[u8]) -> SignatureResult<Address> {
        let signature =
            PrimitiveSignature::try_from(signature).map_err(|_| SignatureError::Malformed {
                len: signature.len(),
            })?;
        let signer = signature
            .recover_address_from_msg(message)
            .map_err(|e| SignatureError::Recovery(e.to_string()))?;
        Ok(Address::from_slice(signer.as_slice()))
    }
}

/// Signs with an in-memory secp256k1 key.
#[derive(Clone, Debug)]
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }

    pub fn from_private_key(key: &[u8; 32]) -> SignatureResult<Self> {
        let inner = PrivateKeySigner::from_slice(key)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl SignatureProvider for LocalSigner {
    fn address(&self) -> Address {
        Address::from_slice(self.inner.address().as_slice())
    }

    fn sign(&self, message: &[u8]) -> SignatureResult<Vec<u8>> {
        let signature = self
            .inner
            .sign_message_sync(message)
            .map_err(|e| SignatureError::Signing(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}

/// Treats the 20-byte signature as the signer's address.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityVerifier;

impl SignatureVerifier for IdentityVerifier {
    fn verify_message(&self, _message: &[u8], signature: &[u8]) -> SignatureResult<Address> {
        if signature.len() != Address::len_bytes() {
            return Err(SignatureError::Malformed {
                len: signature.len(),
            });
        }
        Ok(Address::from_slice(signature))
    }
}

/// Counterpart of [`IdentityVerifier`].
#[derive(Clone, Copy, Debug)]
pub struct IdentitySigner {
    address: Address,
}

impl IdentitySigner {
    pub const fn new(address: Address) -> Self {
        Self { address }
    }
}

impl SignatureProvider for IdentitySigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, _message: &[u8]) -> SignatureResult<Vec<u8>> {
        Ok(self.address.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdsa_round_trip() {
        let signer = LocalSigner::random();
        let signature = signer.sign(b"transfer 5 uni").unwrap();

        assert_eq!(signature.len(), 65);
        assert_eq!(
            EcdsaVerifier
                .verify_message(b"transfer 5 uni", &signature)
                .unwrap(),
            signer.address()
        );
        // A different message recovers some other address.
        assert_ne!(
            EcdsaVerifier
                .verify_message(b"transfer 50 uni", &signature)
                .ok(),
            Some(signer.address())
        );
    }

    #[test]
    fn ecdsa_rejects_garbage() {
        assert_eq!(
            EcdsaVerifier.verify_message(b"msg", &[1, 2, 3]).unwrap_err(),
            SignatureError::Malformed { len: 3 }
        );
    }

    #[test]
    fn private_key_fixes_the_address() {
        let key = [7u8; 32];
        let a = LocalSigner::from_private_key(&key).unwrap();
        let b = LocalSigner::from_private_key(&key).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(LocalSigner::from_private_key(&[0u8; 32]).is_err());
    }

    #[test]
    fn identity_signature_names_the_signer() {
        let address = Address::repeat_byte(0xa1);
        let signature = IdentitySigner::new(address).sign(b"anything").unwrap();
        assert_eq!(
            IdentityVerifier.verify_message(b"else", &signature).unwrap(),
            address
        );
        assert!(IdentityVerifier.verify_message(b"", &[0; 19]).is_err());
    }
}
