//! # Ed25519 Identity
//!
//! Signing identities for the handshake: the server holds a long-term
//! key pair distributed out of band; each client generates a fresh
//! pair per connection and binds it to the DH exchange via the
//! transcript signature.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::constants::{ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use crate::error::{CryptoError, Result};

/// Ed25519 key pair for signing.
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a key pair from a 32-byte seed.
    pub fn from_private_key(private_key: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = private_key.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: 32,
                got: private_key.len(),
            }
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Private key seed, wiped on drop.
    pub fn private_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519KeyPair")
            .field("public_key", &self.signing_key.verifying_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for signature verification.
#[derive(Clone)]
pub struct Ed25519PublicKey {
    verifying_key: VerifyingKey,
}

impl Ed25519PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key_bytes: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: ED25519_PUBLIC_KEY_SIZE,
                got: bytes.len(),
            }
        })?;

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;

        Ok(Self { verifying_key })
    }

    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.verifying_key.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let sig_bytes: [u8; ED25519_SIGNATURE_SIZE] = signature.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: ED25519_SIGNATURE_SIZE,
                got: signature.len(),
            }
        })?;

        self.verifying_key
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| CryptoError::SignatureVerificationFailed.into())
    }
}

impl std::fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519PublicKey")
            .field("key", &self.verifying_key)
            .finish()
    }
}
