//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Simple handshake only (no HMAC digest); every mainstream ingest accepts it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// C0C1 not sent yet
    Initial,
    /// Waiting for S0S1S2
    WaitingForServer,
    Done,
}

/// Client side of the handshake
#[derive(Debug)]
pub struct ClientHandshake {
    state: HandshakeState,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Initial,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes the server must send before [`process_server`](Self::process_server) can finish
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::WaitingForServer => 1 + HANDSHAKE_SIZE * 2,
            _ => 0,
        }
    }

    /// C0 + C1
    pub fn c0c1(&mut self) -> Result<Bytes> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }

        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&generate_packet());

        self.state = HandshakeState::WaitingForServer;
        Ok(buf.freeze())
    }

    /// Consume S0 + S1 + S2 and produce C2.
    ///
    /// Returns `Ok(None)` while fewer than [`bytes_needed`](Self::bytes_needed)
    /// bytes are buffered; nothing is consumed in that case.
    pub fn process_server(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::WaitingForServer {
            return Err(HandshakeError::InvalidState.into());
        }
        if data.remaining() < 1 + HANDSHAKE_SIZE * 2 {
            return Ok(None);
        }

        // Some servers answer with versions above 3; only reject the obviously wrong ones
        let version = data.get_u8();
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        data.copy_to_slice(&mut s1);

        // S2 should echo C1, but plenty of servers get it wrong
        data.advance(HANDSHAKE_SIZE);

        self.state = HandshakeState::Done;
        Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1: time (4) + zero (4) + random (1528)
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Filler only needs to look random, not be unpredictable
    let mut seed = (timestamp as u64) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        let len = chunk.len();
        chunk.copy_from_slice(&bytes[..len]);
    }

    packet
}

/// C2: peer's time + our time + peer's random
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}
