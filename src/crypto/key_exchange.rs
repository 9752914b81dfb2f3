//! # X25519 Key Exchange
//!
//! Ephemeral Diffie-Hellman for the handshake. The secret is consumed
//! by its single DH operation, so a key pair can never be reused
//! across sessions.

use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::constants::X25519_PUBLIC_KEY_SIZE;
use crate::error::{CryptoError, Result};

/// One-shot X25519 key pair.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Perform Diffie-Hellman, consuming the secret.
    ///
    /// An all-zero shared secret indicates a low-order peer key and is
    /// rejected.
    pub fn diffie_hellman(
        self,
        their_public: &[u8; X25519_PUBLIC_KEY_SIZE],
    ) -> Result<Zeroizing<[u8; 32]>> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*their_public));

        if shared.as_bytes().iter().all(|&b| b == 0) {
            return Err(CryptoError::ZeroSharedSecret.into());
        }

        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_agreement() {
        let alice = EphemeralKeyPair::generate();
        let bob = EphemeralKeyPair::generate();

        let alice_public = alice.public_key();
        let bob_public = bob.public_key();

        let shared_a = alice.diffie_hellman(&bob_public).unwrap();
        let shared_b = bob.diffie_hellman(&alice_public).unwrap();

        assert_eq!(&*shared_a, &*shared_b);
    }

    #[test]
    fn test_different_peers_different_secrets() {
        let alice1 = EphemeralKeyPair::generate();
        let alice2 = EphemeralKeyPair::generate();
        let bob_public = EphemeralKeyPair::generate().public_key();

        let shared1 = alice1.diffie_hellman(&bob_public).unwrap();
        let shared2 = alice2.diffie_hellman(&bob_public).unwrap();

        assert_ne!(&*shared1, &*shared2);
    }

    #[test]
    fn test_zero_peer_key_rejected() {
        let alice = EphemeralKeyPair::generate();
        // The identity point yields an all-zero shared secret
        assert!(alice.diffie_hellman(&[0u8; 32]).is_err());
    }
}
