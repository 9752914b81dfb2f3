//! # ChaCha20-Poly1305 AEAD
//!
//! RFC 8439 AEAD via RustCrypto. Key material is held in a `Zeroizing`
//! wrapper so it is wiped on drop.

use chacha20poly1305::{
    aead::{Aead as _, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::Zeroizing;

use crate::constants::{CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE};
use crate::error::{CryptoError, Result};

/// ChaCha20-Poly1305 cipher bound to one directional traffic key.
pub struct Aead {
    key: Zeroizing<[u8; CHACHA20_KEY_SIZE]>,
}

impl Aead {
    pub fn new(key: &[u8; CHACHA20_KEY_SIZE]) -> Self {
        Aead {
            key: Zeroizing::new(*key),
        }
    }

    /// Encrypt with authentication. Output is ciphertext || 16-byte tag.
    pub fn encrypt(
        &self,
        nonce: &[u8; CHACHA20_NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&*self.key).expect("valid key size");
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed.into())
    }

    /// Decrypt and verify the tag and associated data.
    pub fn decrypt(
        &self,
        nonce: &[u8; CHACHA20_NONCE_SIZE],
        ciphertext_with_tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        if ciphertext_with_tag.len() < POLY1305_TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed.into());
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&*self.key).expect("valid key size");
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext_with_tag,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed.into())
    }
}
