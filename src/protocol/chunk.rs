//! RTMP chunk stream
//!
//! Messages are split into chunks of at most `chunk_size` payload bytes:
//!
//! ```text
//! +--------------+----------------+--------------------+-----------+
//! | Basic header | Message header | Extended timestamp | Payload   |
//! | (1-3 bytes)  | (0/3/7/11)     | (0 or 4)           | (<= size) |
//! +--------------+----------------+--------------------+-----------+
//! ```
//!
//! The encoder writes a type 0 header for the first chunk of every message and
//! type 3 headers for the continuation chunks. That costs a few bytes per
//! message over header compression and keeps the writer stateless across
//! chunk streams. The decoder understands all four header types.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete (de-chunked) RTMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Chunk stream the message travels on
    pub csid: u32,
    /// Message type ID
    pub type_id: u8,
    /// Message stream ID (0 for NetConnection)
    pub stream_id: u32,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Writes messages as chunks
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Only call after the matching SetChunkSize message has been encoded
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn encode(&self, msg: &RawMessage, out: &mut BytesMut) {
        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let header_ts = if extended {
            EXTENDED_TIMESTAMP
        } else {
            msg.timestamp
        };

        put_basic_header(out, 0, msg.csid);
        put_u24(out, header_ts);
        put_u24(out, msg.payload.len() as u32);
        out.put_u8(msg.type_id);
        out.put_u32_le(msg.stream_id);
        if extended {
            out.put_u32(msg.timestamp);
        }

        let chunk_size = self.chunk_size as usize;
        let mut chunks = msg.payload.chunks(chunk_size);
        if let Some(first) = chunks.next() {
            out.put_slice(first);
        }
        for chunk in chunks {
            put_basic_header(out, 3, msg.csid);
            if extended {
                out.put_u32(msg.timestamp);
            }
            out.put_slice(chunk);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn put_basic_header(out: &mut BytesMut, fmt: u8, csid: u32) {
    let fmt = fmt << 6;
    match csid {
        2..=63 => out.put_u8(fmt | csid as u8),
        64..=319 => {
            out.put_u8(fmt);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid - 64;
            out.put_u8(fmt | 1);
            out.put_u8((id & 0xFF) as u8);
            out.put_u8((id >> 8) as u8);
        }
    }
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

/// Per chunk stream reassembly state
#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
    partial: BytesMut,
}

/// Reassembles chunks into messages
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Apply a SetChunkSize received from the peer
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Decode the next complete message from `buf`.
    ///
    /// Consumes whole chunks only; a chunk that is not fully buffered is left
    /// in place and `Ok(None)` is returned.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            if buf.is_empty() {
                return Ok(None);
            }

            // Basic header
            let fmt = buf[0] >> 6;
            let (csid, mut pos) = match buf[0] & 0x3F {
                0 => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    (64 + buf[1] as u32, 2)
                }
                1 => {
                    if buf.len() < 3 {
                        return Ok(None);
                    }
                    (64 + buf[1] as u32 + ((buf[2] as u32) << 8), 3)
                }
                id => (id as u32, 1),
            };

            let header_len = match fmt {
                0 => 11,
                1 => 7,
                2 => 3,
                _ => 0,
            };
            if buf.len() < pos + header_len {
                return Ok(None);
            }

            if fmt != 0 && !self.streams.contains_key(&csid) {
                return Err(ProtocolError::InvalidChunkHeader(csid).into());
            }
            let prev = self.streams.entry(csid).or_default();

            // Message header, staged in locals until the whole chunk is buffered
            let mut timestamp = prev.timestamp;
            let mut delta = prev.delta;
            let mut length = prev.length;
            let mut type_id = prev.type_id;
            let mut stream_id = prev.stream_id;
            let mut ts_field = None;
            if fmt <= 2 {
                ts_field = Some(read_u24(&buf[pos..]));
            }
            if fmt <= 1 {
                length = read_u24(&buf[pos + 3..]);
                type_id = buf[pos + 6];
            }
            if fmt == 0 {
                stream_id = u32::from_le_bytes([
                    buf[pos + 7],
                    buf[pos + 8],
                    buf[pos + 9],
                    buf[pos + 10],
                ]);
            }
            pos += header_len;

            let extended = match ts_field {
                Some(ts) => ts == EXTENDED_TIMESTAMP,
                None => prev.extended,
            };
            let mut ts_value = ts_field.unwrap_or(0);
            if extended {
                if buf.len() < pos + 4 {
                    return Ok(None);
                }
                ts_value = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
                pos += 4;
            }

            if length > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge(length).into());
            }

            let starting = prev.partial.is_empty();
            let remaining = length as usize - prev.partial.len().min(length as usize);
            let chunk_len = remaining.min(self.chunk_size as usize);
            if buf.len() < pos + chunk_len {
                return Ok(None);
            }

            if starting {
                match fmt {
                    0 => {
                        timestamp = ts_value;
                        delta = 0;
                    }
                    1 | 2 => {
                        delta = ts_value;
                        timestamp = timestamp.wrapping_add(delta);
                    }
                    _ => timestamp = timestamp.wrapping_add(delta),
                }
            }

            prev.timestamp = timestamp;
            prev.delta = delta;
            prev.length = length;
            prev.type_id = type_id;
            prev.stream_id = stream_id;
            prev.extended = extended;

            buf.advance(pos);
            let payload = buf.split_to(chunk_len);
            prev.partial.extend_from_slice(&payload);

            if prev.partial.len() >= length as usize {
                let payload = prev.partial.split().freeze();
                return Ok(Some(RawMessage {
                    csid,
                    type_id,
                    stream_id,
                    timestamp,
                    payload,
                }));
            }
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(csid: u32, timestamp: u32, len: usize) -> RawMessage {
        RawMessage {
            csid,
            type_id: MSG_VIDEO,
            stream_id: 1,
            timestamp,
            payload: Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>()),
        }
    }

    #[test]
    fn test_single_chunk_header_layout() {
        let enc = ChunkEncoder::new();
        let mut out = BytesMut::new();
        enc.encode(&message(CSID_VIDEO, 40, 10), &mut out);

        assert_eq!(out.len(), 1 + 11 + 10);
        assert_eq!(out[0], CSID_VIDEO as u8); // fmt 0
        assert_eq!(&out[1..4], &[0, 0, 40]);
        assert_eq!(&out[4..7], &[0, 0, 10]);
        assert_eq!(out[7], MSG_VIDEO);
        assert_eq!(&out[8..12], &[1, 0, 0, 0]); // little-endian stream id
    }

    #[test]
    fn test_message_split_across_chunks() {
        let enc = ChunkEncoder::new();
        let msg = message(CSID_AUDIO, 1000, 300);
        let mut out = BytesMut::new();
        enc.encode(&msg, &mut out);

        // 128 + 128 + 44 payload, one type 3 header byte per continuation
        assert_eq!(out.len(), 12 + 300 + 2);
        assert_eq!(out[12 + 128], 0xC0 | CSID_AUDIO as u8);

        let mut dec = ChunkDecoder::new();
        assert_eq!(dec.decode(&mut out).unwrap(), Some(msg));
        assert!(out.is_empty());
    }

    #[test]
    fn test_decoder_waits_for_complete_chunk() {
        let enc = ChunkEncoder::new();
        let msg = message(CSID_VIDEO, 5, 200);
        let mut full = BytesMut::new();
        enc.encode(&msg, &mut full);

        let mut dec = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for byte in full.iter() {
            buf.put_u8(*byte);
            if let Some(m) = dec.decode(&mut buf).unwrap() {
                decoded = Some(m);
            }
        }
        assert_eq!(decoded, Some(msg));
    }

    #[test]
    fn test_extended_timestamp() {
        let mut enc = ChunkEncoder::new();
        enc.set_chunk_size(64);
        let msg = message(CSID_VIDEO, 0x0100_0000, 100);
        let mut out = BytesMut::new();
        enc.encode(&msg, &mut out);

        assert_eq!(&out[1..4], &[0xFF, 0xFF, 0xFF]);
        // header + ext + 64 + (1 + ext + 36)
        assert_eq!(out.len(), 12 + 4 + 64 + 1 + 4 + 36);

        let mut dec = ChunkDecoder::new();
        dec.set_chunk_size(64);
        let decoded = dec.decode(&mut out).unwrap().unwrap();
        assert_eq!(decoded.timestamp, 0x0100_0000);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn test_compressed_headers_from_server() {
        // fmt 0, then fmt 2 (delta only) and fmt 3 (repeat delta) on csid 3
        let mut buf = BytesMut::new();
        buf.put_u8(0x03);
        buf.put_slice(&[0, 0, 100, 0, 0, 2, MSG_COMMAND_AMF0, 0, 0, 0, 0]);
        buf.put_slice(&[0xAA, 0xBB]);
        buf.put_u8(0x80 | 0x03);
        buf.put_slice(&[0, 0, 10]);
        buf.put_slice(&[0xCC, 0xDD]);
        buf.put_u8(0xC0 | 0x03);
        buf.put_slice(&[0xEE, 0xFF]);

        let mut dec = ChunkDecoder::new();
        let a = dec.decode(&mut buf).unwrap().unwrap();
        let b = dec.decode(&mut buf).unwrap().unwrap();
        let c = dec.decode(&mut buf).unwrap().unwrap();

        assert_eq!((a.timestamp, &a.payload[..]), (100, &[0xAA, 0xBB][..]));
        assert_eq!((b.timestamp, &b.payload[..]), (110, &[0xCC, 0xDD][..]));
        assert_eq!((c.timestamp, &c.payload[..]), (120, &[0xEE, 0xFF][..]));
        assert_eq!(c.type_id, MSG_COMMAND_AMF0);
    }

    #[test]
    fn test_unknown_csid_with_compressed_header() {
        let mut buf = BytesMut::from(&[0xC0 | 0x07, 0x00][..]);
        let mut dec = ChunkDecoder::new();
        assert!(dec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_large_chunk_stream_ids() {
        let enc = ChunkEncoder::new();
        for csid in [64, 319, 320, 1000] {
            let msg = message(csid, 0, 4);
            let mut out = BytesMut::new();
            enc.encode(&msg, &mut out);
            let decoded = ChunkDecoder::new().decode(&mut out).unwrap();
            assert_eq!(decoded, Some(msg));
        }
    }

    #[test]
    fn test_empty_payload() {
        let enc = ChunkEncoder::new();
        let msg = message(CSID_COMMAND, 0, 0);
        let mut out = BytesMut::new();
        enc.encode(&msg, &mut out);
        assert_eq!(out.len(), 12);
        assert_eq!(ChunkDecoder::new().decode(&mut out).unwrap(), Some(msg));
    }
}
