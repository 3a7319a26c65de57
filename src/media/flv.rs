//! FLV tags and files
//!
//! RTMP audio/video messages are FLV tag bodies without the tag header, so
//! the same codec byte layouts apply to both.
//!
//! FLV tag on disk:
//! ```text
//! +--------+-------------+-----------+-------------+---------+----------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) | PrevTagSize(4) |
//! +--------+-------------+-----------+-------------+---------+----------------+
//! ```
//!
//! Video data starts with `FrameType(4 bits) | CodecID(4 bits)`, audio data
//! with `SoundFormat(4) | SoundRate(2) | SoundSize(1) | SoundType(1)`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

const FLV_SIGNATURE: &[u8; 3] = b"FLV";
const FLV_HEADER_SIZE: usize = 9;
const TAG_HEADER_SIZE: usize = 11;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// Parsed FLV tag
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Milliseconds
    pub timestamp: u32,
    /// Tag body including codec headers
    pub data: Bytes,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    /// Reserved for server use
    GeneratedKeyframe = 4,
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    /// H.264
    Avc = 7,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            _ => None,
        }
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            _ => None,
        }
    }
}

impl FlvTag {
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    pub fn is_keyframe(&self) -> bool {
        self.is_video()
            && !self.data.is_empty()
            && VideoFrameType::from_byte(self.data[0])
                .map(|ft| ft.is_keyframe())
                .unwrap_or(false)
    }

    pub fn is_avc_sequence_header(&self) -> bool {
        self.is_video()
            && self.data.len() >= 2
            && VideoCodec::from_byte(self.data[0]) == Some(VideoCodec::Avc)
            && self.data[1] == 0
    }

    pub fn is_aac_sequence_header(&self) -> bool {
        self.is_audio()
            && self.data.len() >= 2
            && AudioFormat::from_byte(self.data[0]) == Some(AudioFormat::Aac)
            && self.data[1] == 0
    }

    /// Append the on-disk tag plus its trailing PreviousTagSize
    pub fn write_to(&self, buf: &mut BytesMut) {
        let size = self.data.len() as u32;
        buf.put_u8(self.tag_type.as_byte());
        put_u24(buf, size);
        put_u24(buf, self.timestamp & 0x00FF_FFFF);
        buf.put_u8((self.timestamp >> 24) as u8);
        put_u24(buf, 0);
        buf.put_slice(&self.data);
        buf.put_u32(TAG_HEADER_SIZE as u32 + size);
    }
}

/// FLV file header followed by PreviousTagSize0
pub fn file_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(FLV_HEADER_SIZE + 4);
    buf.put_slice(FLV_SIGNATURE);
    buf.put_u8(1);
    buf.put_u8(((has_audio as u8) << 2) | has_video as u8);
    buf.put_u32(FLV_HEADER_SIZE as u32);
    buf.put_u32(0);
    buf.freeze()
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

fn get_u24(buf: &mut Bytes) -> u32 {
    let hi = buf.get_u16() as u32;
    (hi << 8) | buf.get_u8() as u32
}

/// Reads tags out of an in-memory FLV file
#[derive(Debug)]
pub struct FlvReader {
    data: Bytes,
    has_audio: bool,
    has_video: bool,
}

impl FlvReader {
    /// Validate the file header and position at the first tag
    pub fn new(mut data: Bytes) -> Result<Self> {
        if data.len() < FLV_HEADER_SIZE || &data[..3] != FLV_SIGNATURE {
            return Err(MediaError::InvalidFlvHeader.into());
        }
        data.advance(4);
        let flags = data.get_u8();
        let header_size = data.get_u32() as usize;
        if header_size < FLV_HEADER_SIZE {
            return Err(MediaError::InvalidFlvHeader.into());
        }

        // Extra header bytes plus PreviousTagSize0
        let skip = header_size - FLV_HEADER_SIZE + 4;
        if data.len() < skip {
            return Err(MediaError::InvalidFlvHeader.into());
        }
        data.advance(skip);

        Ok(Self {
            data,
            has_audio: flags & 0x04 != 0,
            has_video: flags & 0x01 != 0,
        })
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    /// Next tag, or `Ok(None)` at end of file.
    ///
    /// Tags of unknown type are skipped.
    pub fn next_tag(&mut self) -> Result<Option<FlvTag>> {
        loop {
            if self.data.is_empty() {
                return Ok(None);
            }
            if self.data.len() < TAG_HEADER_SIZE {
                return Err(MediaError::TruncatedFlvTag.into());
            }

            let type_byte = self.data[0];
            let size = ((self.data[1] as usize) << 16)
                | ((self.data[2] as usize) << 8)
                | self.data[3] as usize;
            if self.data.len() < TAG_HEADER_SIZE + size + 4 {
                return Err(MediaError::TruncatedFlvTag.into());
            }

            self.data.advance(4);
            let low = get_u24(&mut self.data);
            let timestamp = ((self.data.get_u8() as u32) << 24) | low;
            self.data.advance(3);
            let body = self.data.split_to(size);
            self.data.advance(4);

            if let Some(tag_type) = FlvTagType::from_byte(type_byte) {
                return Ok(Some(FlvTag {
                    tag_type,
                    timestamp,
                    data: body,
                }));
            }
        }
    }
}

impl Iterator for FlvReader {
    type Item = Result<FlvTag>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_tag() {
            Ok(Some(tag)) => Some(Ok(tag)),
            Ok(None) => None,
            Err(e) => {
                // Stop after the first error
                self.data.clear();
                Some(Err(e))
            }
        }
    }
}
