//! # Constants
//!
//! Shared constants for the tunnel wire protocol.

// ═══════════════════════════════════════════════════════════════════════════
// FRAMING
// ═══════════════════════════════════════════════════════════════════════════

/// Size of the big-endian length prefix on every post-handshake frame
pub const FRAME_LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum frame payload carried after the length prefix
pub const MAX_FRAME_SIZE: usize = 65535;

/// Maximum inner IP packet: a sealed packet grows by one AEAD tag
pub const MAX_PACKET_SIZE: usize = MAX_FRAME_SIZE - POLY1305_TAG_SIZE;

// ═══════════════════════════════════════════════════════════════════════════
// SYMMETRIC ENCRYPTION
// ═══════════════════════════════════════════════════════════════════════════

/// ChaCha20 key size in bytes
pub const CHACHA20_KEY_SIZE: usize = 32;

/// ChaCha20 nonce size in bytes
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes
pub const POLY1305_TAG_SIZE: usize = 16;

/// Associated data per frame: direction tag (1) + big-endian counter (8)
pub const AAD_SIZE: usize = 9;

/// Direction tag for client-to-server frames
pub const DIRECTION_CLIENT_TO_SERVER: u8 = 0x00;

/// Direction tag for server-to-client frames
pub const DIRECTION_SERVER_TO_CLIENT: u8 = 0x01;

// ═══════════════════════════════════════════════════════════════════════════
// ASYMMETRIC KEYS
// ═══════════════════════════════════════════════════════════════════════════

/// Ed25519 public key size in bytes
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// X25519 public key size in bytes
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════
// HANDSHAKE
// ═══════════════════════════════════════════════════════════════════════════

/// Random nonce contributed by each side to the handshake transcript
pub const HANDSHAKE_NONCE_SIZE: usize = 32;

/// Shortest dotted-quad IPv4 address ("0.0.0.0")
pub const MIN_IPV4_TEXT_LEN: usize = 7;

/// Longest dotted-quad IPv4 address ("255.255.255.255")
pub const MAX_IPV4_TEXT_LEN: usize = 15;

/// ServerHello wire size: signature (64) + nonce (32) + X25519 public (32)
pub const SERVER_HELLO_SIZE: usize =
    ED25519_SIGNATURE_SIZE + HANDSHAKE_NONCE_SIZE + X25519_PUBLIC_KEY_SIZE;

/// HKDF info string for the client-to-server traffic key
pub const INFO_CLIENT_TO_SERVER: &[u8] = b"client-to-server";

/// HKDF info string for the server-to-client traffic key
pub const INFO_SERVER_TO_CLIENT: &[u8] = b"server-to-client";

/// Session identifier size (SHA-256 digest)
pub const SESSION_ID_SIZE: usize = 32;

/// Read timeout applied to each handshake message
pub const HANDSHAKE_READ_TIMEOUT_SECS: u64 = 10;

// ═══════════════════════════════════════════════════════════════════════════
// SERVER RUNTIME
// ═══════════════════════════════════════════════════════════════════════════

/// Bounded capacity of each connection's outbound packet channel
pub const WRITER_CHANNEL_CAPACITY: usize = 8;
