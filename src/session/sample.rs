//! Sample units handed over by the capture subsystem

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Which capture source produced a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    /// Screen frames
    Video,
    /// Audio played by apps on the device
    DeviceAudio,
    /// Microphone audio
    MicAudio,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Video => write!(f, "video"),
            SampleKind::DeviceAudio => write!(f, "device_audio"),
            SampleKind::MicAudio => write!(f, "mic_audio"),
        }
    }
}

/// Encoded content of a unit
#[derive(Debug, Clone, PartialEq)]
pub enum MediaPayload {
    /// AVCDecoderConfigurationRecord for video, AudioSpecificConfig for audio
    Config(Bytes),
    /// AVCC NAL units for video, one raw AAC access unit for audio
    Frame { data: Bytes, keyframe: bool },
}

impl MediaPayload {
    pub fn len(&self) -> usize {
        match self {
            MediaPayload::Config(data) => data.len(),
            MediaPayload::Frame { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One time-stamped audio or video buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SampleUnit {
    pub kind: SampleKind,
    /// Capture presentation time
    pub timestamp: Duration,
    pub payload: MediaPayload,
}

impl SampleUnit {
    pub fn new(kind: SampleKind, timestamp: Duration, payload: MediaPayload) -> Self {
        Self {
            kind,
            timestamp,
            payload,
        }
    }

    pub fn video_config(record: Bytes) -> Self {
        Self::new(SampleKind::Video, Duration::ZERO, MediaPayload::Config(record))
    }

    pub fn video_frame(timestamp: Duration, nalus: Bytes, keyframe: bool) -> Self {
        Self::new(
            SampleKind::Video,
            timestamp,
            MediaPayload::Frame {
                data: nalus,
                keyframe,
            },
        )
    }

    pub fn audio_config(kind: SampleKind, config: Bytes) -> Self {
        Self::new(kind, Duration::ZERO, MediaPayload::Config(config))
    }

    pub fn audio_frame(kind: SampleKind, timestamp: Duration, data: Bytes) -> Self {
        Self::new(
            kind,
            timestamp,
            MediaPayload::Frame {
                data,
                keyframe: false,
            },
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(self.payload, MediaPayload::Config(_))
    }
}
