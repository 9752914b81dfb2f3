//! # Key Derivation
//!
//! HKDF-SHA256 for deriving the two directional traffic keys from the
//! DH shared secret. Distinct `info` strings keep the directions
//! cryptographically separate.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::constants::CHACHA20_KEY_SIZE;
use crate::error::{CryptoError, Result};

pub struct HkdfSha256;

impl HkdfSha256 {
    /// Derive one 32-byte key from `ikm` under `salt` and `info`.
    pub fn derive_key(
        salt: &[u8],
        ikm: &[u8],
        info: &[u8],
    ) -> Result<Zeroizing<[u8; CHACHA20_KEY_SIZE]>> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);

        let mut okm = [0u8; CHACHA20_KEY_SIZE];
        hkdf.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(Zeroizing::new(okm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{INFO_CLIENT_TO_SERVER, INFO_SERVER_TO_CLIENT};

    #[test]
    fn test_deterministic() {
        let key1 = HkdfSha256::derive_key(b"salt", b"ikm", b"info").unwrap();
        let key2 = HkdfSha256::derive_key(b"salt", b"ikm", b"info").unwrap();
        assert_eq!(&*key1, &*key2);
    }

    #[test]
    fn test_directional_keys_distinct() {
        let shared = [7u8; 32];
        let salt = [9u8; 32];

        let c2s = HkdfSha256::derive_key(&salt, &shared, INFO_CLIENT_TO_SERVER).unwrap();
        let s2c = HkdfSha256::derive_key(&salt, &shared, INFO_SERVER_TO_CLIENT).unwrap();

        assert_ne!(&*c2s, &*s2c);
    }

    #[test]
    fn test_salt_changes_output() {
        let key1 = HkdfSha256::derive_key(b"salt1", b"ikm", b"info").unwrap();
        let key2 = HkdfSha256::derive_key(b"salt2", b"ikm", b"info").unwrap();
        assert_ne!(&*key1, &*key2);
    }
}
