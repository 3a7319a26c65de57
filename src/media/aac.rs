//! AAC audio tags
//!
//! RTMP carries raw AAC (no ADTS headers) behind a two byte audio tag header:
//!
//! ```text
//! +-----------+----------+----------+----------+---------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AACType | AACData
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  | (1 byte)|
//! +-----------+----------+----------+----------+---------+
//! ```
//!
//! For AAC the first byte is always 0xAF; the real rate and channel layout
//! live in the AudioSpecificConfig sent as the sequence header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};
use crate::media::flv::AudioFormat;

/// 0xAF: AAC, 44 kHz, 16 bit, stereo
const AAC_TAG_HEADER: u8 = 0xAF;

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// AudioSpecificConfig
    SequenceHeader = 0,
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// AAC profile (audio object type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    Main = 1,
    /// Low Complexity, what hardware encoders produce
    Lc = 2,
    Ssr = 3,
    Ltp = 4,
    /// HE-AAC
    Sbr = 5,
}

impl AacProfile {
    pub fn from_object_type(ot: u8) -> Option<Self> {
        match ot {
            1 => Some(AacProfile::Main),
            2 => Some(AacProfile::Lc),
            3 => Some(AacProfile::Ssr),
            4 => Some(AacProfile::Ltp),
            5 => Some(AacProfile::Sbr),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AacProfile::Main => "AAC Main",
            AacProfile::Lc => "AAC LC",
            AacProfile::Ssr => "AAC SSR",
            AacProfile::Ltp => "AAC LTP",
            AacProfile::Sbr => "HE-AAC",
        }
    }
}

/// AudioSpecificConfig (from sequence header)
#[derive(Debug, Clone)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// Hz
    pub sampling_frequency: u32,
    /// 1 = mono, 2 = stereo, ...
    pub channel_configuration: u8,
    /// 960 sample frames instead of 1024
    pub frame_length_flag: bool,
}

impl AudioSpecificConfig {
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse the bit-packed config
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        // audioObjectType: 5 bits, samplingFrequencyIndex: 4 bits,
        // channelConfiguration: 4 bits, then GASpecificConfig flags
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);
        let sampling_frequency = Self::SAMPLING_FREQUENCIES
            .get(sampling_frequency_index as usize)
            .copied()
            .ok_or(MediaError::InvalidAacPacket)?;

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration: (b1 >> 3) & 0x0F,
            frame_length_flag: (b1 & 0x04) != 0,
        })
    }

    /// Two byte config for the given profile, rate and channel count.
    ///
    /// Rates outside the standard table are rejected.
    pub fn build(profile: AacProfile, sample_rate: u32, channels: u8) -> Result<Bytes> {
        let index = Self::SAMPLING_FREQUENCIES
            .iter()
            .position(|&f| f == sample_rate)
            .ok_or(MediaError::InvalidAacPacket)? as u8;
        if channels == 0 || channels > 7 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        let object_type = profile as u8;
        let b0 = (object_type << 3) | (index >> 1);
        let b1 = ((index & 0x01) << 7) | (channels << 3);
        Ok(Bytes::copy_from_slice(&[b0, b1]))
    }

    pub fn profile(&self) -> Option<AacProfile> {
        AacProfile::from_object_type(self.audio_object_type)
    }

    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8,
            // 0 means defined in the stream
            _ => 0,
        }
    }

    pub fn samples_per_frame(&self) -> u32 {
        if self.frame_length_flag {
            960
        } else {
            1024
        }
    }
}

/// Audio tag body, either direction
#[derive(Debug, Clone, PartialEq)]
pub enum AacPacket {
    /// Raw AudioSpecificConfig bytes
    SequenceHeader(Bytes),
    Frame(Bytes),
}

impl AacPacket {
    /// Parse a complete audio tag body (including the sound format byte)
    pub fn parse(mut body: Bytes) -> Result<Self> {
        if body.len() < 2 || AudioFormat::from_byte(body[0]) != Some(AudioFormat::Aac) {
            return Err(MediaError::InvalidAacPacket.into());
        }
        body.advance(1);

        match AacPacketType::from_byte(body.get_u8()) {
            Some(AacPacketType::SequenceHeader) => {
                AudioSpecificConfig::parse(&body)?;
                Ok(AacPacket::SequenceHeader(body))
            }
            Some(AacPacketType::Raw) => Ok(AacPacket::Frame(body)),
            None => Err(MediaError::InvalidAacPacket.into()),
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(self, AacPacket::SequenceHeader(_))
    }

    /// Build the audio tag body
    pub fn to_tag_body(&self) -> Bytes {
        let (packet_type, data) = match self {
            AacPacket::SequenceHeader(config) => (AacPacketType::SequenceHeader, config),
            AacPacket::Frame(data) => (AacPacketType::Raw, data),
        };

        let mut buf = BytesMut::with_capacity(2 + data.len());
        buf.put_u8(AAC_TAG_HEADER);
        buf.put_u8(packet_type as u8);
        buf.put_slice(data);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_specific_config_parse() {
        // AAC-LC, 44100 Hz, stereo
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channels(), 2);
        assert_eq!(config.profile(), Some(AacProfile::Lc));
        assert_eq!(config.samples_per_frame(), 1024);
    }

    #[test]
    fn test_audio_specific_config_various_rates() {
        // (bytes, rate, channels)
        let cases = [
            (&[0x12, 0x10][..], 44100, 2),
            (&[0x11, 0x90][..], 48000, 2),
            (&[0x11, 0x88][..], 48000, 1),
        ];

        for (data, rate, channels) in cases {
            let config = AudioSpecificConfig::parse(data).unwrap();
            assert_eq!(config.sampling_frequency, rate, "rate for {:02X?}", data);
            assert_eq!(config.channels(), channels, "channels for {:02X?}", data);
        }
    }

    #[test]
    fn test_build_matches_parse() {
        let config = AudioSpecificConfig::build(AacProfile::Lc, 44100, 2).unwrap();
        assert_eq!(&config[..], &[0x12, 0x10]);

        let config = AudioSpecificConfig::build(AacProfile::Lc, 48000, 1).unwrap();
        assert_eq!(&config[..], &[0x11, 0x88]);
    }

    #[test]
    fn test_build_rejects_odd_rates() {
        assert!(AudioSpecificConfig::build(AacProfile::Lc, 44000, 2).is_err());
        assert!(AudioSpecificConfig::build(AacProfile::Lc, 44100, 0).is_err());
    }

    #[test]
    fn test_config_too_short() {
        assert!(AudioSpecificConfig::parse(&[0x12]).is_err());
        // Index 13 is reserved
        assert!(AudioSpecificConfig::parse(&[0x16, 0x90]).is_err());
    }

    #[test]
    fn test_sequence_header_tag() {
        let packet = AacPacket::SequenceHeader(Bytes::from_static(&[0x12, 0x10]));
        let body = packet.to_tag_body();
        assert_eq!(&body[..], &[0xAF, 0x00, 0x12, 0x10]);

        let parsed = AacPacket::parse(body).unwrap();
        assert!(parsed.is_sequence_header());
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_raw_frame_tag() {
        let body = Bytes::from_static(&[0xAF, 0x01, 0x21, 0x00, 0x49, 0x90, 0x02]);
        match AacPacket::parse(body).unwrap() {
            AacPacket::Frame(data) => assert_eq!(data.len(), 5),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_bodies() {
        // MP3
        assert!(AacPacket::parse(Bytes::from_static(&[0x2F, 0x01, 0x00])).is_err());
        // Unknown packet type
        assert!(AacPacket::parse(Bytes::from_static(&[0xAF, 0x02, 0x00])).is_err());
        assert!(AacPacket::parse(Bytes::from_static(&[0xAF])).is_err());
        // Sequence header with a broken config
        assert!(AacPacket::parse(Bytes::from_static(&[0xAF, 0x00, 0x12])).is_err());
    }

    #[test]
    fn test_profile_names() {
        assert_eq!(AacProfile::from_object_type(2), Some(AacProfile::Lc));
        assert_eq!(AacProfile::Lc.name(), "AAC LC");
        assert_eq!(AacProfile::Sbr.name(), "HE-AAC");
        assert_eq!(AacProfile::from_object_type(0), None);
    }
}
