//! # Cryptographic Primitives
//!
//! Thin wrappers over the RustCrypto and dalek crates:
//! - ChaCha20-Poly1305 AEAD with explicit nonce and associated data
//! - Ed25519 identity keys and signatures
//! - X25519 ephemeral key exchange
//! - HKDF-SHA256 key derivation
//! - Persistent key file for the server's long-term identity

mod aead;
mod identity;
mod kdf;
mod key_exchange;
mod keyfile;

pub use aead::Aead;
pub use identity::{Ed25519KeyPair, Ed25519PublicKey};
pub use kdf::HkdfSha256;
pub use key_exchange::EphemeralKeyPair;
pub use keyfile::KeyFile;
