//! # chatun - Point-to-Multipoint IP Tunnel
//!
//! An IP-layer tunnel over TCP:
//! - Mutually authenticated handshake (X25519 + Ed25519 + HKDF-SHA256)
//! - ChaCha20-Poly1305 packet plane with counter nonces
//! - Server-side dispatch from tunnel-local IP to client session
//! - NAT gateway through the server's default egress interface
//!
//! ## Architecture
//!
//! ```text
//! src/
//! ├── crypto/         # AEAD, identity, key exchange, KDF, key file
//! ├── frame.rs        # Length-prefixed framing over TCP
//! ├── session.rs      # Directional session halves and counters
//! ├── handshake.rs    # Three-message authenticated key exchange
//! ├── ipv4.rs         # Inner IPv4 header parsing
//! ├── tun.rs          # Linux TUN device
//! ├── platform.rs     # NAT, forwarding, routes
//! ├── config.rs       # TOML configuration
//! ├── client.rs       # Client runtime
//! └── server.rs       # Server runtime
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ipv4;
pub mod platform;
pub mod server;
pub mod session;
pub mod tun;

// Re-export commonly used types
pub use config::{ClientConfig, ServerConfig};
pub use constants::*;
pub use error::{ConfigError, CryptoError, PlatformError, ProtocolError, Result, TunnelError};
pub use session::{Direction, RecvHalf, SendHalf, SessionId, SessionKeys};
pub use tun::TunDevice;
