//! # Error Module
//!
//! Unified error handling for the tunnel.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum TunnelError {
    Io(io::Error),
    Config(ConfigError),
    Platform(PlatformError),
    Protocol(ProtocolError),
    Crypto(CryptoError),
}

/// Startup configuration problems. Always fatal.
#[derive(Debug)]
pub enum ConfigError {
    Read(String),
    Parse(String),
    InvalidAddress(String),
    InvalidCidr(String),
    InvalidKey(String),
    KeyFile(String),
}

/// TUN device, route, or firewall command failures.
#[derive(Debug)]
pub enum PlatformError {
    TunOpenFailed,
    PermissionDenied,
    IoctlFailed(String),
    InvalidName(String),
    CommandFailed { command: String, output: String },
    NoDefaultRoute,
}

/// Malformed wire data. Closes the offending connection.
#[derive(Debug)]
pub enum ProtocolError {
    InvalidFrameLength(u32),
    InvalidIpVersion(u8),
    InvalidIpLength(u8),
    InvalidInnerAddress(String),
    PacketTooShort { min: usize, got: usize },
    InvalidIhl(u8),
    LengthMismatch { header: usize, buffer: usize },
}

/// Authentication and key-schedule failures. Never retried.
#[derive(Debug)]
pub enum CryptoError {
    SignatureVerificationFailed,
    AuthenticationFailed,
    CounterExhausted,
    InvalidKeyLength { expected: usize, got: usize },
    ZeroSharedSecret,
    KeyDerivationFailed(String),
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TunnelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelError::Io(e) => write!(f, "I/O error: {}", e),
            TunnelError::Config(e) => write!(f, "Config error: {}", e),
            TunnelError::Platform(e) => write!(f, "Platform error: {}", e),
            TunnelError::Protocol(e) => write!(f, "Protocol error: {}", e),
            TunnelError::Crypto(e) => write!(f, "Crypto error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(msg) => write!(f, "cannot read file: {}", msg),
            ConfigError::Parse(msg) => write!(f, "parse failure: {}", msg),
            ConfigError::InvalidAddress(addr) => write!(f, "invalid address: {}", addr),
            ConfigError::InvalidCidr(cidr) => write!(f, "invalid CIDR: {}", cidr),
            ConfigError::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            ConfigError::KeyFile(msg) => write!(f, "key file: {}", msg),
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::TunOpenFailed => write!(f, "failed to open /dev/net/tun"),
            PlatformError::PermissionDenied => {
                write!(f, "permission denied (need root or CAP_NET_ADMIN)")
            }
            PlatformError::IoctlFailed(msg) => write!(f, "ioctl failed: {}", msg),
            PlatformError::InvalidName(name) => write!(f, "invalid interface name: {}", name),
            PlatformError::CommandFailed { command, output } => {
                write!(f, "{} failed: {}", command, output)
            }
            PlatformError::NoDefaultRoute => write!(f, "no default route found"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidFrameLength(len) => write!(f, "invalid frame length: {}", len),
            ProtocolError::InvalidIpVersion(v) => write!(f, "unsupported IP version: {}", v),
            ProtocolError::InvalidIpLength(len) => {
                write!(f, "invalid address field length: {}", len)
            }
            ProtocolError::InvalidInnerAddress(addr) => {
                write!(f, "invalid inner address: {}", addr)
            }
            ProtocolError::PacketTooShort { min, got } => {
                write!(f, "packet too short: need {}, got {}", min, got)
            }
            ProtocolError::InvalidIhl(ihl) => write!(f, "invalid IHL: {}", ihl),
            ProtocolError::LengthMismatch { header, buffer } => {
                write!(f, "total length {} exceeds buffer {}", header, buffer)
            }
        }
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::SignatureVerificationFailed => write!(f, "signature verification failed"),
            CryptoError::AuthenticationFailed => write!(f, "AEAD authentication failed"),
            CryptoError::CounterExhausted => write!(f, "message counter exhausted"),
            CryptoError::InvalidKeyLength { expected, got } => {
                write!(f, "invalid key length: expected {}, got {}", expected, got)
            }
            CryptoError::ZeroSharedSecret => {
                write!(f, "zero shared secret - invalid peer public key")
            }
            CryptoError::KeyDerivationFailed(msg) => write!(f, "key derivation failed: {}", msg),
        }
    }
}

impl From<io::Error> for TunnelError {
    fn from(e: io::Error) -> Self {
        TunnelError::Io(e)
    }
}

impl From<ConfigError> for TunnelError {
    fn from(e: ConfigError) -> Self {
        TunnelError::Config(e)
    }
}

impl From<PlatformError> for TunnelError {
    fn from(e: PlatformError) -> Self {
        TunnelError::Platform(e)
    }
}

impl From<ProtocolError> for TunnelError {
    fn from(e: ProtocolError) -> Self {
        TunnelError::Protocol(e)
    }
}

impl From<CryptoError> for TunnelError {
    fn from(e: CryptoError) -> Self {
        TunnelError::Crypto(e)
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
