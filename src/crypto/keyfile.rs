//! # Key File
//!
//! Persistent container for the server's long-term Ed25519 identity,
//! generated once on first start and reloaded after.
//!
//! Layout:
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Magic: "CHTN" (4 bytes)                │
//! │ Version: u8                            │
//! │ Creation Time: u64 LE (Unix seconds)   │
//! │ Private Key: [u8; 32]                  │
//! │ Public Key: [u8; 32]                   │
//! │ Checksum: u32 LE (CRC32)               │
//! └────────────────────────────────────────┘
//! Total: 81 bytes
//! ```

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use crate::crypto::Ed25519KeyPair;
use crate::error::{ConfigError, Result};

pub const KEY_FILE_MAGIC: &[u8; 4] = b"CHTN";
pub const KEY_FILE_VERSION: u8 = 1;

/// 4 (magic) + 1 (version) + 8 (timestamp) + 32 (private) + 32 (public) + 4 (checksum)
pub const KEY_FILE_SIZE: usize = 81;

/// Serialized server identity.
pub struct KeyFile {
    pub created_at: u64,
    private_key: Zeroizing<[u8; 32]>,
    public_key: [u8; 32],
}

impl KeyFile {
    /// Wrap a freshly generated key pair.
    pub fn generate() -> Self {
        let keypair = Ed25519KeyPair::generate();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            created_at,
            private_key: keypair.private_key(),
            public_key: keypair.public_key(),
        }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn keypair(&self) -> Result<Ed25519KeyPair> {
        Ed25519KeyPair::from_private_key(&self.private_key[..])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(KEY_FILE_SIZE);
        buf.extend_from_slice(KEY_FILE_MAGIC);
        buf.push(KEY_FILE_VERSION);
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        buf.extend_from_slice(&self.private_key[..]);
        buf.extend_from_slice(&self.public_key);

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < KEY_FILE_SIZE {
            return Err(ConfigError::KeyFile(format!(
                "file too small: expected {} bytes, got {}",
                KEY_FILE_SIZE,
                data.len()
            ))
            .into());
        }
        if &data[0..4] != KEY_FILE_MAGIC {
            return Err(ConfigError::KeyFile("bad magic (not a chatun key file)".into()).into());
        }
        if data[4] != KEY_FILE_VERSION {
            return Err(ConfigError::KeyFile(format!(
                "unsupported version: {}",
                data[4]
            ))
            .into());
        }

        let stored = u32::from_le_bytes(data[77..81].try_into().unwrap());
        let calculated = crc32fast::hash(&data[0..77]);
        if stored != calculated {
            return Err(ConfigError::KeyFile(format!(
                "checksum mismatch: stored {:08x}, calculated {:08x}",
                stored, calculated
            ))
            .into());
        }

        let created_at = u64::from_le_bytes(data[5..13].try_into().unwrap());
        let mut private_key = [0u8; 32];
        private_key.copy_from_slice(&data[13..45]);
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[45..77]);

        Ok(Self {
            created_at,
            private_key: Zeroizing::new(private_key),
            public_key,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data =
            fs::read(&path).map_err(|e| ConfigError::KeyFile(format!("cannot read: {}", e)))?;
        Self::from_bytes(&data)
    }

    /// Load the key file at `path`, generating and persisting a fresh
    /// identity if none exists yet.
    pub fn load_or_generate<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let keyfile = Self::generate();
            keyfile.save(path)?;
            Ok(keyfile)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let keyfile = KeyFile::generate();
        let bytes = keyfile.to_bytes();
        assert_eq!(bytes.len(), KEY_FILE_SIZE);

        let restored = KeyFile::from_bytes(&bytes).unwrap();
        assert_eq!(restored.public_key(), keyfile.public_key());
        assert_eq!(restored.created_at, keyfile.created_at);
        assert_eq!(
            restored.keypair().unwrap().public_key(),
            *keyfile.public_key()
        );
    }

    #[test]
    fn test_public_matches_private() {
        let keyfile = KeyFile::generate();
        let keypair = keyfile.keypair().unwrap();
        assert_eq!(keypair.public_key(), *keyfile.public_key());
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = KeyFile::generate().to_bytes();
        bytes[20] ^= 0xFF;
        assert!(KeyFile::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = KeyFile::generate().to_bytes();
        bytes[0] = b'X';
        assert!(KeyFile::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = KeyFile::generate().to_bytes();
        assert!(KeyFile::from_bytes(&bytes[..40]).is_err());
    }
}
