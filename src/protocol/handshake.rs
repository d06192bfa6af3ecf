//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! This implementation uses the "simple" handshake (no HMAC digest).
//! Complex handshake with HMAC-SHA256 is used by some servers but not
//! required for publishing.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Client-side handshake state machine
#[derive(Debug)]
pub struct ClientHandshake {
    state: HandshakeState,
    /// Our C1 packet (saved for verification)
    c1: Option<[u8; HANDSHAKE_SIZE]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Initial state - need to send C0C1
    Initial,
    /// Waiting for the server's S0S1S2
    WaitingForServer,
    /// Handshake complete
    Done,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Initial,
            c1: None,
        }
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes expected from the server before the next transition
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::Initial => 0,
            HandshakeState::WaitingForServer => 1 + HANDSHAKE_SIZE * 2,
            HandshakeState::Done => 0,
        }
    }

    /// Generate C0+C1 (1 + 1536 bytes)
    pub fn generate_c0c1(&mut self) -> Result<Bytes> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }

        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);

        // C0: Version
        buf.put_u8(RTMP_VERSION);

        // C1: Time + Zero + Random
        let c1 = generate_packet();
        self.c1 = Some(c1);
        buf.put_slice(&c1);

        self.state = HandshakeState::WaitingForServer;
        Ok(buf.freeze())
    }

    /// Process the server's S0S1S2 and return C2 when complete.
    ///
    /// Returns `Ok(None)` when more data is needed; the buffer is left
    /// untouched in that case.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::WaitingForServer {
            return Ok(None);
        }

        if data.remaining() < 1 + HANDSHAKE_SIZE * 2 {
            return Ok(None);
        }

        // S0: Version check. Be lenient and accept anything >= 3, some
        // servers advertise odd values.
        let version = data.get_u8();
        if version < 3 {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        // S1: the packet we echo back as C2
        let mut s1 = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut s1);

        // S2: echo of our C1. Only the random tail is compared because
        // many servers rewrite the two timestamp words.
        let mut s2 = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut s2);
        if let Some(c1) = &self.c1 {
            if s2[8..] != c1[8..] {
                return Err(HandshakeError::ResponseMismatch.into());
            }
        }

        let c2 = generate_echo(&s1);
        self.state = HandshakeState::Done;
        Ok(Some(Bytes::copy_from_slice(&c2)))
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the C1 packet
///
/// Format (1536 bytes):
/// - Bytes 0-3: Timestamp (32-bit, big-endian)
/// - Bytes 4-7: Zero (simple handshake)
/// - Bytes 8-1535: Random data
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);

    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());
    packet[4..8].copy_from_slice(&[0, 0, 0, 0]);
    rand::thread_rng().fill_bytes(&mut packet[8..]);

    packet
}

/// Generate the C2 echo packet
///
/// Format:
/// - Bytes 0-3: Server's timestamp (from S1)
/// - Bytes 4-7: Our receive timestamp
/// - Bytes 8-1535: Copy of the server's random data
fn generate_echo(s1: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *s1;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);

    echo[4..8].copy_from_slice(&timestamp.to_be_bytes());

    echo
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    /// Build S0S1S2 the way a simple server would, echoing the given C1.
    fn server_response(c0c1: &Bytes) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
        buf.put_u8(RTMP_VERSION);
        let s1 = generate_packet();
        buf.put_slice(&s1);
        let mut s2 = [0u8; HANDSHAKE_SIZE];
        s2.copy_from_slice(&c0c1[1..]);
        buf.put_slice(&s2);
        buf.freeze()
    }

    #[test]
    fn test_client_handshake_flow() {
        let mut client = ClientHandshake::new();

        let c0c1 = client.generate_c0c1().unwrap();
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert!(!client.is_done());

        let mut s0s1s2 = server_response(&c0c1);
        let c2 = client.process(&mut s0s1s2).unwrap().unwrap();
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert!(client.is_done());
    }

    #[test]
    fn test_partial_server_data() {
        let mut client = ClientHandshake::new();
        let c0c1 = client.generate_c0c1().unwrap();

        let full = server_response(&c0c1);
        let mut partial = full.slice(..100);
        assert!(client.process(&mut partial).unwrap().is_none());
        assert!(!client.is_done());

        let mut full = full;
        assert!(client.process(&mut full).unwrap().is_some());
        assert!(client.is_done());
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut client = ClientHandshake::new();
        let c0c1 = client.generate_c0c1().unwrap();

        let good = server_response(&c0c1);
        let mut bad = BytesMut::from(&good[..]);
        bad[0] = 1;
        let mut bad = bad.freeze();
        assert!(client.process(&mut bad).is_err());
    }

    #[test]
    fn test_echo_mismatch_rejected() {
        let mut client = ClientHandshake::new();
        let c0c1 = client.generate_c0c1().unwrap();

        let good = server_response(&c0c1);
        let mut bad = BytesMut::from(&good[..]);
        // Corrupt the random tail of S2
        let tail = 1 + HANDSHAKE_SIZE + 100;
        bad[tail] = bad[tail].wrapping_add(1);
        let mut bad = bad.freeze();
        assert!(client.process(&mut bad).is_err());
    }

    #[test]
    fn test_double_c0c1_is_error() {
        let mut client = ClientHandshake::new();
        client.generate_c0c1().unwrap();
        assert!(client.generate_c0c1().is_err());
    }

    #[test]
    fn test_c1_layout() {
        let packet = generate_packet();
        // Bytes 4-7 are zero for the simple handshake
        assert_eq!(&packet[4..8], &[0, 0, 0, 0]);
    }
}
