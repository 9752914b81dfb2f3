//! # Configuration
//!
//! TOML configuration for both ends of the tunnel.
//!
//! Client:
//! ```toml
//! [tun]
//! name = "chatun0"
//!
//! [client]
//! server = "vpn.example.net:8345"
//! server_public_key = "E5a9...base64...="
//!
//! [ipv4]
//! address = "10.0.0.2/24"
//! ```
//!
//! Server:
//! ```toml
//! [tun]
//! name = "chatun0"
//!
//! [server]
//! listen = "0.0.0.0:8345"
//! key_file = "/etc/chatun/server.key"
//!
//! [ipv4]
//! address = "10.0.0.1/24"
//! ```

use std::fs;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

use crate::crypto::Ed25519PublicKey;
use crate::error::{ConfigError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// SECTIONS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct TunSection {
    #[serde(default = "default_tun_name")]
    pub name: String,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

impl Default for TunSection {
    fn default() -> Self {
        TunSection {
            name: default_tun_name(),
            mtu: default_mtu(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Ipv4Section {
    /// Tunnel-local address in CIDR form, e.g. "10.0.0.2/24"
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Server endpoint as host:port
    pub server: String,
    /// Server's long-term Ed25519 public key, base64
    pub server_public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// TCP listen endpoint, e.g. "0.0.0.0:8345"
    pub listen: String,
    /// Long-term Ed25519 key pair, generated on first start
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

fn default_tun_name() -> String {
    "chatun0".to_string()
}
fn default_mtu() -> u16 {
    1500
}
fn default_key_file() -> String {
    "/etc/chatun/server.key".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// CLIENT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub tun: TunSection,
    pub client: ClientSection,
    pub ipv4: Ipv4Section,
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Resolve the server endpoint.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        self.client
            .server
            .to_socket_addrs()
            .map_err(|_| ConfigError::InvalidAddress(self.client.server.clone()))?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| ConfigError::InvalidAddress(self.client.server.clone()).into())
    }

    /// Tunnel-local address and prefix length.
    pub fn tunnel_cidr(&self) -> Result<(Ipv4Addr, u8)> {
        parse_cidr(&self.ipv4.address)
    }

    /// Decode the out-of-band server identity key.
    pub fn server_public_key(&self) -> Result<Ed25519PublicKey> {
        let bytes = BASE64
            .decode(self.client.server_public_key.trim())
            .map_err(|e| ConfigError::InvalidKey(format!("bad base64: {}", e)))?;
        if bytes.len() != 32 {
            return Err(ConfigError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            ))
            .into());
        }
        Ed25519PublicKey::from_bytes(&bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub tun: TunSection,
    pub server: ServerSection,
    pub ipv4: Ipv4Section,
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.server.listen.clone()).into())
    }

    pub fn tunnel_cidr(&self) -> Result<(Ipv4Addr, u8)> {
        parse_cidr(&self.ipv4.address)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Parse "a.b.c.d/prefix" into address and prefix length.
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr_text, prefix_text) = cidr
        .split_once('/')
        .ok_or_else(|| ConfigError::InvalidCidr(cidr.to_string()))?;

    let addr: Ipv4Addr = addr_text
        .parse()
        .map_err(|_| ConfigError::InvalidCidr(cidr.to_string()))?;
    let prefix: u8 = prefix_text
        .parse()
        .map_err(|_| ConfigError::InvalidCidr(cidr.to_string()))?;
    if prefix > 32 {
        return Err(ConfigError::InvalidCidr(cidr.to_string()).into());
    }

    Ok((addr, prefix))
}

/// Netmask for a prefix length, e.g. 24 -> 255.255.255.0.
pub fn netmask_from_prefix(prefix: u8) -> Ipv4Addr {
    debug_assert!(prefix <= 32);
    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    };
    Ipv4Addr::from(mask)
}
