//! # Handshake
//!
//! Three messages over the fresh TCP connection, all position-delimited
//! (sizes fixed by protocol constants, except the client's length-
//! prefixed address field):
//!
//! ```text
//! Client                                              Server
//!   │  ClientHello: ver, ip_len, ip, ed_pub,            │
//!   │               curve_pub, client_nonce   ────────▶ │
//!   │                                                   │
//!   │ ◀──────  ServerHello: sig(curve_pub_s ‖ nonce_s ‖ │
//!   │          nonce_c), nonce_s, curve_pub_s           │
//!   │                                                   │
//!   │  ClientSignature: sig(curve_pub_c ‖               │
//!   │                   nonce_c ‖ nonce_s)    ────────▶ │
//! ```
//!
//! The server signs with its long-term Ed25519 key (known to clients
//! out of band); the client signs with the per-connection key it sent
//! in the hello, binding that ephemeral identity to the DH exchange.
//! Both sides then derive the directional keys via HKDF-SHA256.

use std::io::{Read, Write};
use std::net::Ipv4Addr;

use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::constants::{
    ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE, HANDSHAKE_NONCE_SIZE, INFO_CLIENT_TO_SERVER,
    INFO_SERVER_TO_CLIENT, MAX_IPV4_TEXT_LEN, MIN_IPV4_TEXT_LEN, SERVER_HELLO_SIZE,
    X25519_PUBLIC_KEY_SIZE,
};
use crate::crypto::{Ed25519KeyPair, Ed25519PublicKey, EphemeralKeyPair, HkdfSha256};
use crate::error::{ProtocolError, Result};
use crate::session::{SessionId, SessionKeys};

/// Inner IP version accepted by this tunnel.
const IP_VERSION: u8 = 4;

// ═══════════════════════════════════════════════════════════════════════════
// MESSAGES
// ═══════════════════════════════════════════════════════════════════════════

/// First message: the client declares its tunnel-local address and
/// contributes its per-connection public keys and nonce.
#[derive(Debug)]
pub struct ClientHello {
    pub inner_ip: Ipv4Addr,
    pub ed25519_public: [u8; ED25519_PUBLIC_KEY_SIZE],
    pub curve_public: [u8; X25519_PUBLIC_KEY_SIZE],
    pub nonce: [u8; HANDSHAKE_NONCE_SIZE],
}

impl ClientHello {
    pub fn to_bytes(&self) -> Vec<u8> {
        let ip_text = self.inner_ip.to_string();
        let mut buf = Vec::with_capacity(2 + ip_text.len() + 96);
        buf.push(IP_VERSION);
        buf.push(ip_text.len() as u8);
        buf.extend_from_slice(ip_text.as_bytes());
        buf.extend_from_slice(&self.ed25519_public);
        buf.extend_from_slice(&self.curve_public);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut header = [0u8; 2];
        r.read_exact(&mut header)?;

        if header[0] != IP_VERSION {
            return Err(ProtocolError::InvalidIpVersion(header[0]).into());
        }
        let ip_len = header[1] as usize;
        if !(MIN_IPV4_TEXT_LEN..=MAX_IPV4_TEXT_LEN).contains(&ip_len) {
            return Err(ProtocolError::InvalidIpLength(header[1]).into());
        }

        let mut body = vec![0u8; ip_len + 96];
        r.read_exact(&mut body)?;

        let ip_text = std::str::from_utf8(&body[..ip_len])
            .map_err(|_| ProtocolError::InvalidInnerAddress("<non-utf8>".into()))?;
        let inner_ip: Ipv4Addr = ip_text
            .parse()
            .map_err(|_| ProtocolError::InvalidInnerAddress(ip_text.to_string()))?;

        let mut ed25519_public = [0u8; ED25519_PUBLIC_KEY_SIZE];
        ed25519_public.copy_from_slice(&body[ip_len..ip_len + 32]);
        let mut curve_public = [0u8; X25519_PUBLIC_KEY_SIZE];
        curve_public.copy_from_slice(&body[ip_len + 32..ip_len + 64]);
        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        nonce.copy_from_slice(&body[ip_len + 64..ip_len + 96]);

        Ok(Self {
            inner_ip,
            ed25519_public,
            curve_public,
            nonce,
        })
    }
}

/// Second message: fixed 128-byte layout.
pub struct ServerHello {
    pub signature: [u8; ED25519_SIGNATURE_SIZE],
    pub nonce: [u8; HANDSHAKE_NONCE_SIZE],
    pub curve_public: [u8; X25519_PUBLIC_KEY_SIZE],
}

impl ServerHello {
    pub fn to_bytes(&self) -> [u8; SERVER_HELLO_SIZE] {
        let mut buf = [0u8; SERVER_HELLO_SIZE];
        buf[..64].copy_from_slice(&self.signature);
        buf[64..96].copy_from_slice(&self.nonce);
        buf[96..].copy_from_slice(&self.curve_public);
        buf
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; SERVER_HELLO_SIZE];
        r.read_exact(&mut buf)?;

        let mut signature = [0u8; ED25519_SIGNATURE_SIZE];
        signature.copy_from_slice(&buf[..64]);
        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        nonce.copy_from_slice(&buf[64..96]);
        let mut curve_public = [0u8; X25519_PUBLIC_KEY_SIZE];
        curve_public.copy_from_slice(&buf[96..]);

        Ok(Self {
            signature,
            nonce,
            curve_public,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSCRIPTS AND KEY SCHEDULE
// ═══════════════════════════════════════════════════════════════════════════

fn server_transcript(
    curve_public_server: &[u8; 32],
    server_nonce: &[u8; 32],
    client_nonce: &[u8; 32],
) -> Vec<u8> {
    let mut t = Vec::with_capacity(96);
    t.extend_from_slice(curve_public_server);
    t.extend_from_slice(server_nonce);
    t.extend_from_slice(client_nonce);
    t
}

fn client_transcript(
    curve_public_client: &[u8; 32],
    client_nonce: &[u8; 32],
    server_nonce: &[u8; 32],
) -> Vec<u8> {
    let mut t = Vec::with_capacity(96);
    t.extend_from_slice(curve_public_client);
    t.extend_from_slice(client_nonce);
    t.extend_from_slice(server_nonce);
    t
}

/// Derive the directional keys and session id from the DH output.
fn derive_session(
    shared: &Zeroizing<[u8; 32]>,
    server_nonce: &[u8; 32],
    client_nonce: &[u8; 32],
    is_server: bool,
) -> Result<SessionKeys> {
    let mut hasher = Sha256::new();
    hasher.update(server_nonce);
    hasher.update(client_nonce);
    let salt: [u8; 32] = hasher.finalize().into();

    let k_c2s = HkdfSha256::derive_key(&salt, &shared[..], INFO_CLIENT_TO_SERVER)?;
    let k_s2c = HkdfSha256::derive_key(&salt, &shared[..], INFO_SERVER_TO_CLIENT)?;

    let mut hasher = Sha256::new();
    hasher.update(&shared[..]);
    hasher.update(salt);
    let session_id = SessionId(hasher.finalize().into());

    let (key_send, key_recv) = if is_server {
        (k_s2c, k_c2s)
    } else {
        (k_c2s, k_s2c)
    };

    Ok(SessionKeys::new(session_id, key_send, key_recv, is_server))
}

fn random_nonce() -> [u8; HANDSHAKE_NONCE_SIZE] {
    let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ═══════════════════════════════════════════════════════════════════════════
// DRIVERS
// ═══════════════════════════════════════════════════════════════════════════

/// Client side of the handshake.
///
/// `server_public` is the server's long-term Ed25519 key, distributed
/// out of band. Any verification failure aborts before a session
/// exists.
pub fn connect<S: Read + Write>(
    conn: &mut S,
    inner_ip: Ipv4Addr,
    server_public: &Ed25519PublicKey,
) -> Result<SessionKeys> {
    let identity = Ed25519KeyPair::generate();
    let ephemeral = EphemeralKeyPair::generate();
    let client_nonce = random_nonce();
    let curve_public = ephemeral.public_key();

    let hello = ClientHello {
        inner_ip,
        ed25519_public: identity.public_key(),
        curve_public,
        nonce: client_nonce,
    };
    conn.write_all(&hello.to_bytes())?;

    let server_hello = ServerHello::read_from(conn)?;

    server_public.verify(
        &server_transcript(&server_hello.curve_public, &server_hello.nonce, &client_nonce),
        &server_hello.signature,
    )?;

    let signature = identity.sign(&client_transcript(
        &curve_public,
        &client_nonce,
        &server_hello.nonce,
    ));
    conn.write_all(&signature)?;

    let shared = ephemeral.diffie_hellman(&server_hello.curve_public)?;
    derive_session(&shared, &server_hello.nonce, &client_nonce, false)
}

/// Server side of the handshake.
///
/// Returns the session keys and the tunnel-local address the client
/// declared. The address is a dispatch label only; nothing beyond the
/// signature checks prevents a client from claiming any address.
pub fn accept<S: Read + Write>(
    conn: &mut S,
    server_identity: &Ed25519KeyPair,
) -> Result<(SessionKeys, Ipv4Addr)> {
    let hello = ClientHello::read_from(conn)?;

    let ephemeral = EphemeralKeyPair::generate();
    let server_nonce = random_nonce();
    let curve_public = ephemeral.public_key();

    let signature =
        server_identity.sign(&server_transcript(&curve_public, &server_nonce, &hello.nonce));
    let server_hello = ServerHello {
        signature,
        nonce: server_nonce,
        curve_public,
    };
    conn.write_all(&server_hello.to_bytes())?;

    let mut client_signature = [0u8; ED25519_SIGNATURE_SIZE];
    conn.read_exact(&mut client_signature)?;

    let client_public = Ed25519PublicKey::from_bytes(&hello.ed25519_public)?;
    client_public.verify(
        &client_transcript(&hello.curve_public, &hello.nonce, &server_nonce),
        &client_signature,
    )?;

    let shared = ephemeral.diffie_hellman(&hello.curve_public)?;
    let keys = derive_session(&shared, &server_nonce, &hello.nonce, true)?;
    Ok((keys, hello.inner_ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn test_client_hello_roundtrip() {
        let hello = ClientHello {
            inner_ip: Ipv4Addr::new(10, 0, 0, 2),
            ed25519_public: [1u8; 32],
            curve_public: [2u8; 32],
            nonce: [3u8; 32],
        };
        let bytes = hello.to_bytes();
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1] as usize, "10.0.0.2".len());

        let parsed = ClientHello::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed.inner_ip, hello.inner_ip);
        assert_eq!(parsed.ed25519_public, hello.ed25519_public);
        assert_eq!(parsed.curve_public, hello.curve_public);
        assert_eq!(parsed.nonce, hello.nonce);
    }

    #[test]
    fn test_client_hello_rejects_wrong_ip_version() {
        let mut bytes = ClientHello {
            inner_ip: Ipv4Addr::new(10, 0, 0, 2),
            ed25519_public: [0u8; 32],
            curve_public: [0u8; 32],
            nonce: [0u8; 32],
        }
        .to_bytes();
        bytes[0] = 6;

        let err = ClientHello::read_from(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(
            err,
            crate::TunnelError::Protocol(ProtocolError::InvalidIpVersion(6))
        ));
    }

    #[test]
    fn test_client_hello_rejects_bad_ip_length() {
        for bad_len in [0u8, 6, 16, 255] {
            let mut bytes = vec![4u8, bad_len];
            bytes.extend_from_slice(&[0u8; 300]);
            assert!(ClientHello::read_from(&mut Cursor::new(&bytes)).is_err());
        }
    }

    #[test]
    fn test_client_hello_rejects_garbage_address() {
        let mut bytes = vec![4u8, 9];
        bytes.extend_from_slice(b"10.0.0.x!");
        bytes.extend_from_slice(&[0u8; 96]);
        let err = ClientHello::read_from(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(
            err,
            crate::TunnelError::Protocol(ProtocolError::InvalidInnerAddress(_))
        ));
    }

    #[test]
    fn test_server_hello_roundtrip() {
        let hello = ServerHello {
            signature: [7u8; 64],
            nonce: [8u8; 32],
            curve_public: [9u8; 32],
        };
        let bytes = hello.to_bytes();
        assert_eq!(bytes.len(), 128);

        let parsed = ServerHello::read_from(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(parsed.signature, hello.signature);
        assert_eq!(parsed.nonce, hello.nonce);
        assert_eq!(parsed.curve_public, hello.curve_public);
    }

    #[test]
    fn test_full_handshake_over_tcp() {
        let server_identity = Ed25519KeyPair::generate();
        let server_public = Ed25519PublicKey::from_bytes(&server_identity.public_key()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            accept(&mut conn, &server_identity).unwrap()
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        let client_keys =
            connect(&mut conn, Ipv4Addr::new(10, 0, 0, 2), &server_public).unwrap();

        let (server_keys, declared_ip) = server.join().unwrap();

        // Both ends agree on the handshake outcome
        assert_eq!(client_keys.session_id, server_keys.session_id);
        assert_eq!(declared_ip, Ipv4Addr::new(10, 0, 0, 2));

        // And the derived keys interoperate in both directions
        let (mut c_send, mut c_recv) = client_keys.split();
        let (mut s_send, mut s_recv) = server_keys.split();

        let up = c_send.seal(b"up").unwrap();
        assert_eq!(&s_recv.open(&up).unwrap()[..], b"up");

        let down = s_send.seal(b"down").unwrap();
        assert_eq!(&c_recv.open(&down).unwrap()[..], b"down");
    }

    #[test]
    fn test_wrong_server_key_aborts_before_any_session() {
        let server_identity = Ed25519KeyPair::generate();
        let impostor = Ed25519KeyPair::generate();
        let wrong_public = Ed25519PublicKey::from_bytes(&impostor.public_key()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            // Client hangs up instead of sending its signature
            accept(&mut conn, &server_identity)
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        let err = connect(&mut conn, Ipv4Addr::new(10, 0, 0, 2), &wrong_public).unwrap_err();
        assert!(matches!(
            err,
            crate::TunnelError::Crypto(crate::CryptoError::SignatureVerificationFailed)
        ));
        drop(conn);

        assert!(server.join().unwrap().is_err());
    }

    #[test]
    fn test_tampered_server_signature_rejected() {
        let server_identity = Ed25519KeyPair::generate();
        let server_public = Ed25519PublicKey::from_bytes(&server_identity.public_key()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let hello = ClientHello::read_from(&mut conn).unwrap();

            let ephemeral = EphemeralKeyPair::generate();
            let server_nonce = random_nonce();
            let curve_public = ephemeral.public_key();
            let mut signature = server_identity.sign(&server_transcript(
                &curve_public,
                &server_nonce,
                &hello.nonce,
            ));
            signature[10] ^= 1;

            let reply = ServerHello {
                signature,
                nonce: server_nonce,
                curve_public,
            };
            conn.write_all(&reply.to_bytes()).unwrap();
            // Drain whatever the client does next
            let mut sink = Vec::new();
            let _ = conn.read_to_end(&mut sink);
        });

        let mut conn = TcpStream::connect(addr).unwrap();
        let result = connect(&mut conn, Ipv4Addr::new(10, 0, 0, 2), &server_public);
        assert!(result.is_err());
        drop(conn);
        server.join().unwrap();
    }

    #[test]
    fn test_handshakes_produce_unique_sessions() {
        let server_identity = Ed25519KeyPair::generate();
        let server_public = Ed25519PublicKey::from_bytes(&server_identity.public_key()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut ids = Vec::new();
            for _ in 0..2 {
                let (mut conn, _) = listener.accept().unwrap();
                let (keys, _) = accept(&mut conn, &server_identity).unwrap();
                ids.push(keys.session_id);
            }
            ids
        });

        for _ in 0..2 {
            let mut conn = TcpStream::connect(addr).unwrap();
            connect(&mut conn, Ipv4Addr::new(10, 0, 0, 2), &server_public).unwrap();
        }

        let ids = server.join().unwrap();
        assert_ne!(ids[0], ids[1]);
    }
}
