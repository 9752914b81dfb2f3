//! # Frame Codec
//!
//! Every payload crossing TCP after the handshake is a frame: a 4-byte
//! big-endian length prefix followed by exactly that many bytes of
//! sealed ciphertext. Lengths of zero or above 65535 are protocol
//! violations and kill the connection.

use crate::constants::{FRAME_LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};
use std::io::{ErrorKind, Read, Write};

/// Write one frame as a single buffer so concurrent writers on other
/// connections can never interleave within it.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    debug_assert!(!payload.is_empty() && payload.len() <= MAX_FRAME_SIZE);

    let mut buf = Vec::with_capacity(FRAME_LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    w.write_all(&buf)?;
    Ok(())
}

/// Read one frame into `buf`, returning the payload length.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. A declared
/// length of 0 or above 65535 is a fatal protocol error; EOF inside a
/// frame surfaces as an I/O error.
pub fn read_frame<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<Option<usize>> {
    debug_assert!(buf.len() >= MAX_FRAME_SIZE);

    let mut prefix = [0u8; FRAME_LENGTH_PREFIX_SIZE];
    if let Err(e) = r.read_exact(&mut prefix) {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e.into());
    }

    let length = u32::from_be_bytes(prefix);
    if length == 0 || length as usize > MAX_FRAME_SIZE {
        return Err(ProtocolError::InvalidFrameLength(length).into());
    }

    r.read_exact(&mut buf[..length as usize])?;
    Ok(Some(length as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"hello tunnel").unwrap();

        assert_eq!(&wire[..4], &12u32.to_be_bytes());

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let n = read_frame(&mut Cursor::new(&wire), &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"hello tunnel");
    }

    #[test]
    fn test_total_bytes_on_wire() {
        let payloads: [&[u8]; 3] = [&[1u8; 100], &[2u8; 1416], &[3u8; 1]];
        let mut wire = Vec::new();
        for p in payloads {
            write_frame(&mut wire, p).unwrap();
        }
        let expected: usize = payloads.iter().map(|p| 4 + p.len()).sum();
        assert_eq!(wire.len(), expected);
    }

    #[test]
    fn test_eof_at_boundary_is_graceful() {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let result = read_frame(&mut Cursor::new(&[]), &mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_zero_length_rejected() {
        let wire = 0u32.to_be_bytes();
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let err = read_frame(&mut Cursor::new(&wire), &mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::TunnelError::Protocol(ProtocolError::InvalidFrameLength(0))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        // 0x00010000 = 65536, one past the maximum
        let wire = 65536u32.to_be_bytes();
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let err = read_frame(&mut Cursor::new(&wire), &mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::TunnelError::Protocol(ProtocolError::InvalidFrameLength(65536))
        ));
    }

    #[test]
    fn test_max_length_accepted() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &vec![0xAB; MAX_FRAME_SIZE]).unwrap();

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let n = read_frame(&mut Cursor::new(&wire), &mut buf).unwrap().unwrap();
        assert_eq!(n, MAX_FRAME_SIZE);
    }

    #[test]
    fn test_truncated_frame_is_fatal() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&100u32.to_be_bytes());
        wire.extend_from_slice(&[0u8; 40]); // 60 bytes short

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let err = read_frame(&mut Cursor::new(&wire), &mut buf).unwrap_err();
        assert!(matches!(err, crate::TunnelError::Io(_)));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"first").unwrap();
        write_frame(&mut wire, b"second").unwrap();

        let mut cursor = Cursor::new(&wire);
        let mut buf = vec![0u8; MAX_FRAME_SIZE];

        let n = read_frame(&mut cursor, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = read_frame(&mut cursor, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"second");
        assert!(read_frame(&mut cursor, &mut buf).unwrap().is_none());
    }
}
