//! H.264/AVC video tags
//!
//! RTMP carries H.264 in AVCC form (length-prefixed NAL units) behind a
//! five byte video tag header:
//!
//! ```text
//! +----------+----------+-----------------+-----------------+------
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+-----------------+------
//! ```
//!
//! AVCPacketType 0 carries the AVCDecoderConfigurationRecord, 1 carries NAL
//! units, 2 marks end of sequence.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};
use crate::media::flv::{VideoCodec, VideoFrameType};

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit types the publisher cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }
}

/// AVCDecoderConfigurationRecord summary
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// 66 = Baseline, 77 = Main, 100 = High
    pub profile: u8,
    pub compatibility: u8,
    /// e.g. 31 = 3.1
    pub level: u8,
    /// Bytes per NAL unit length prefix
    pub nalu_length_size: u8,
    pub sps_count: usize,
    pub pps_count: usize,
}

impl AvcConfig {
    pub fn parse(record: &[u8]) -> Result<Self> {
        let mut data = record;
        if data.len() < 7 || data[0] != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        data.advance(1);
        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let sps_count = (data.get_u8() & 0x1F) as usize;
        skip_parameter_sets(&mut data, sps_count)?;
        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let pps_count = data.get_u8() as usize;
        skip_parameter_sets(&mut data, pps_count)?;

        Ok(Self {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps_count,
            pps_count,
        })
    }

    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}

fn skip_parameter_sets(data: &mut &[u8], count: usize) -> Result<()> {
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        data.advance(len);
    }
    Ok(())
}

/// True if any NAL unit in the AVCC buffer (4-byte lengths) is an IDR slice
pub fn contains_idr(nalus: &[u8]) -> bool {
    let mut offset = 0;
    while offset + 4 < nalus.len() {
        let len = u32::from_be_bytes([
            nalus[offset],
            nalus[offset + 1],
            nalus[offset + 2],
            nalus[offset + 3],
        ]) as usize;
        offset += 4;
        if NaluType::from_byte(nalus[offset]) == NaluType::Idr {
            return true;
        }
        offset = offset.saturating_add(len);
    }
    false
}

/// Video tag body, either direction
#[derive(Debug, Clone, PartialEq)]
pub enum AvcPacket {
    /// AVCDecoderConfigurationRecord
    SequenceHeader(Bytes),
    Frame {
        keyframe: bool,
        composition_time: i32,
        nalus: Bytes,
    },
    EndOfSequence,
}

impl AvcPacket {
    /// Parse a complete video tag body (including the frame type/codec byte)
    pub fn parse(mut body: Bytes) -> Result<Self> {
        if body.len() < 5 || VideoCodec::from_byte(body[0]) != Some(VideoCodec::Avc) {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let keyframe = VideoFrameType::from_byte(body[0])
            .map(|t| t.is_keyframe())
            .unwrap_or(false);
        body.advance(1);
        let packet_type = body.get_u8();

        let raw = ((body[0] as i32) << 16) | ((body[1] as i32) << 8) | body[2] as i32;
        // Sign extend from 24 bits
        let composition_time = (raw << 8) >> 8;
        body.advance(3);

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => Ok(AvcPacket::SequenceHeader(body)),
            Some(AvcPacketType::Nalu) => Ok(AvcPacket::Frame {
                keyframe,
                composition_time,
                nalus: body,
            }),
            Some(AvcPacketType::EndOfSequence) => Ok(AvcPacket::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket.into()),
        }
    }

    /// Build the video tag body
    pub fn to_tag_body(&self) -> Bytes {
        let (keyframe, packet_type, cts, data): (bool, AvcPacketType, i32, &[u8]) = match self {
            AvcPacket::SequenceHeader(record) => {
                (true, AvcPacketType::SequenceHeader, 0, &record[..])
            }
            AvcPacket::Frame {
                keyframe,
                composition_time,
                nalus,
            } => (*keyframe, AvcPacketType::Nalu, *composition_time, &nalus[..]),
            AvcPacket::EndOfSequence => (true, AvcPacketType::EndOfSequence, 0, &[][..]),
        };

        let frame_type = if keyframe {
            VideoFrameType::Keyframe
        } else {
            VideoFrameType::InterFrame
        };

        let mut buf = BytesMut::with_capacity(5 + data.len());
        buf.put_u8(((frame_type as u8) << 4) | VideoCodec::Avc as u8);
        buf.put_u8(packet_type as u8);
        let cts = cts as u32;
        buf.put_u8((cts >> 16) as u8);
        buf.put_u8((cts >> 8) as u8);
        buf.put_u8(cts as u8);
        buf.put_slice(data);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Baseline 3.1, 4-byte NALU lengths, one tiny SPS and PPS
    const RECORD: &[u8] = &[
        0x01, 0x42, 0xC0, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1F, 0x01, 0x00, 0x02,
        0x68, 0xCE,
    ];

    #[test]
    fn test_avc_config_parse() {
        let config = AvcConfig::parse(RECORD).unwrap();
        assert_eq!(config.profile_name(), "Baseline");
        assert_eq!(config.level_string(), "3.1");
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!((config.sps_count, config.pps_count), (1, 1));
    }

    #[test]
    fn test_avc_config_rejects_garbage() {
        assert!(AvcConfig::parse(&[0x02, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(AvcConfig::parse(&RECORD[..10]).is_err());
    }

    #[test]
    fn test_sequence_header_tag() {
        let body = AvcPacket::SequenceHeader(Bytes::from_static(RECORD)).to_tag_body();
        assert_eq!(&body[..5], &[0x17, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&body[5..], RECORD);
    }

    #[test]
    fn test_frame_tag_with_negative_composition_time() {
        let packet = AvcPacket::Frame {
            keyframe: false,
            composition_time: -33,
            nalus: Bytes::from_static(&[0, 0, 0, 2, 0x41, 0x9A]),
        };
        let body = packet.to_tag_body();
        assert_eq!(body[0], 0x27);
        assert_eq!(body[1], 0x01);
        assert_eq!(AvcPacket::parse(body).unwrap(), packet);
    }

    #[test]
    fn test_contains_idr() {
        assert!(contains_idr(&[0, 0, 0, 2, 0x65, 0x88]));
        assert!(contains_idr(&[0, 0, 0, 1, 0x09, 0, 0, 0, 2, 0x65, 0x88]));
        assert!(!contains_idr(&[0, 0, 0, 2, 0x41, 0x9A]));
        assert!(!contains_idr(&[]));
    }

    #[test]
    fn test_parse_rejects_non_avc() {
        // VP6 codec id
        assert!(AvcPacket::parse(Bytes::from_static(&[0x14, 0, 0, 0, 0])).is_err());
    }
}
