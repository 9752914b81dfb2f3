//! # Session
//!
//! An established session is split into two single-owner halves: the
//! send half owns `key_send` and `counter_send`, the receive half owns
//! `key_recv` and `counter_recv`. Each counter therefore has exactly
//! one writer, which is what makes the nonce-uniqueness and FIFO
//! invariants hold without shared mutable state.
//!
//! Per frame, the counter serves twice: little-endian in the nonce and
//! big-endian (behind a direction tag) in the associated data, so a
//! replayed, reordered, or cross-direction-spliced frame fails
//! authentication rather than decrypting at the wrong position.

use std::fmt;

use zeroize::Zeroizing;

use crate::constants::{
    AAD_SIZE, CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, DIRECTION_CLIENT_TO_SERVER,
    DIRECTION_SERVER_TO_CLIENT, SESSION_ID_SIZE,
};
use crate::crypto::Aead;
use crate::error::{CryptoError, Result};

/// Which way a frame travels. The tag byte leads the associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            Direction::ClientToServer => DIRECTION_CLIENT_TO_SERVER,
            Direction::ServerToClient => DIRECTION_SERVER_TO_CLIENT,
        }
    }
}

/// Opaque handshake outcome identifier, shared by both ends. Not secret.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub [u8; SESSION_ID_SIZE]);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First eight bytes are plenty for log correlation
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self)
    }
}

/// Key material produced by a completed handshake, not yet split into
/// its single-owner halves.
#[derive(Debug)]
pub struct SessionKeys {
    pub session_id: SessionId,
    key_send: Zeroizing<[u8; CHACHA20_KEY_SIZE]>,
    key_recv: Zeroizing<[u8; CHACHA20_KEY_SIZE]>,
    is_server: bool,
}

impl SessionKeys {
    pub fn new(
        session_id: SessionId,
        key_send: Zeroizing<[u8; CHACHA20_KEY_SIZE]>,
        key_recv: Zeroizing<[u8; CHACHA20_KEY_SIZE]>,
        is_server: bool,
    ) -> Self {
        Self {
            session_id,
            key_send,
            key_recv,
            is_server,
        }
    }

    /// Split into the send and receive halves. Each half can move to
    /// its own thread; counters start at zero.
    pub fn split(self) -> (SendHalf, RecvHalf) {
        let (send_dir, recv_dir) = if self.is_server {
            (Direction::ServerToClient, Direction::ClientToServer)
        } else {
            (Direction::ClientToServer, Direction::ServerToClient)
        };

        let send = SendHalf {
            aead: Aead::new(&self.key_send),
            counter: 0,
            direction: send_dir,
            session_id: self.session_id,
        };
        let recv = RecvHalf {
            aead: Aead::new(&self.key_recv),
            counter: 0,
            direction: recv_dir,
            session_id: self.session_id,
        };
        (send, recv)
    }
}

/// Outbound half: seals packets under `counter_send`.
pub struct SendHalf {
    aead: Aead,
    counter: u64,
    direction: Direction,
    session_id: SessionId,
}

impl SendHalf {
    /// Seal one inner packet. The counter advances only on success and
    /// the session aborts before the counter can wrap.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhausted.into());
        }

        let nonce = nonce_from_counter(self.counter);
        let aad = build_aad(self.direction, self.counter);
        let sealed = self.aead.encrypt(&nonce, plaintext, &aad)?;

        self.counter += 1;
        Ok(sealed)
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }
}

/// Inbound half: opens frames at exactly `counter_recv`.
pub struct RecvHalf {
    aead: Aead,
    counter: u64,
    direction: Direction,
    session_id: SessionId,
}

impl RecvHalf {
    /// Open one sealed frame. A frame produced at any other counter
    /// value, in the other direction, or tampered with in any byte
    /// fails authentication; the counter does not advance on failure
    /// and the session must then be torn down.
    pub fn open(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhausted.into());
        }

        let nonce = nonce_from_counter(self.counter);
        let aad = build_aad(self.direction, self.counter);
        let plaintext = self.aead.decrypt(&nonce, frame, &aad)?;

        self.counter += 1;
        Ok(plaintext)
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// Nonce: the 8-byte little-endian counter left-padded with 4 zero bytes.
#[inline]
fn nonce_from_counter(counter: u64) -> [u8; CHACHA20_NONCE_SIZE] {
    let mut nonce = [0u8; CHACHA20_NONCE_SIZE];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Associated data: direction tag followed by the big-endian counter.
#[inline]
fn build_aad(direction: Direction, counter: u64) -> [u8; AAD_SIZE] {
    let mut aad = [0u8; AAD_SIZE];
    aad[0] = direction.tag();
    aad[1..].copy_from_slice(&counter.to_be_bytes());
    aad
}
