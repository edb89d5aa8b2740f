//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::{address::Address, hash::Hash, hashing::wallet_seed_hasher};

/// A node or client wallet keypair.
///
/// Signatures on the wire are self-contained: the 32-byte public key is
/// prepended to the 64-byte ed25519 signature and the whole value is hex
/// encoded (192 characters). Verification derives the signer address from the
/// embedded public key and checks it against the claimed `from` address, so a
/// transaction carries everything needed to verify it.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministically derives a keypair from a seed phrase.
    pub fn from_seed(seed: &str) -> Self {
        let digest = wallet_seed_hasher().chain_raw(seed.as_bytes()).finalize();
        Self {
            signing: SigningKey::from_bytes(digest.as_bytes()),
        }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key().to_bytes())
    }

    pub fn sign_hash(&self, hash: &Hash) -> String {
        let sig = self.signing.sign(hash.as_bytes());
        let mut out = String::with_capacity(192);
        out.push_str(&hex::encode(self.public_key().to_bytes()));
        out.push_str(&hex::encode(sig.to_bytes()));
        out
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.address())
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature must be 192 hex characters, got {0}")]
    InvalidSignatureLength(usize),
    #[error("signature is not valid hex")]
    InvalidSignatureEncoding,
    #[error("embedded public key is invalid")]
    InvalidPublicKey,
    #[error("signer does not match address {0}")]
    SignerMismatch(Address),
    #[error("signature verification failed")]
    BadSignature,
}

/// Verifies a self-contained signature against the claimed signer address and
/// the signed digest.
pub fn verify_signature(address: &Address, hash: &Hash, sign: &str) -> Result<(), CryptoError> {
    if sign.len() != 192 {
        return Err(CryptoError::InvalidSignatureLength(sign.len()));
    }
    let bytes = hex::decode(sign).map_err(|_| CryptoError::InvalidSignatureEncoding)?;
    let mut pk_bytes = [0u8; 32];
    pk_bytes.copy_from_slice(&bytes[..32]);
    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&bytes[32..]);

    if Address::from_public_key(&pk_bytes) != *address {
        return Err(CryptoError::SignerMismatch(address.clone()));
    }
    let pk = VerifyingKey::from_bytes(&pk_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    pk.verify(hash.as_bytes(), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| CryptoError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = KeyPair::generate();
        let digest = Hash::from_bytes([9u8; 32]);
        let sign = pair.sign_hash(&digest);
        verify_signature(&pair.address(), &digest, &sign).unwrap();
    }

    #[test]
    fn rejects_wrong_signer() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();
        let digest = Hash::from_bytes([9u8; 32]);
        let sign = pair.sign_hash(&digest);
        assert!(matches!(
            verify_signature(&other.address(), &digest, &sign),
            Err(CryptoError::SignerMismatch(_))
        ));
    }

    #[test]
    fn rejects_tampered_digest() {
        let pair = KeyPair::generate();
        let sign = pair.sign_hash(&Hash::from_bytes([9u8; 32]));
        assert!(matches!(
            verify_signature(&pair.address(), &Hash::from_bytes([8u8; 32]), &sign),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = KeyPair::from_seed("correct horse battery staple");
        let b = KeyPair::from_seed("correct horse battery staple");
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), KeyPair::from_seed("other").address());
    }
}
