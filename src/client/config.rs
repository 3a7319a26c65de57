//! Publisher configuration

use std::time::Duration;

use crate::amf::AmfValue;
use crate::protocol::constants::*;
use crate::session::classifier::DEFAULT_LOG_INTERVAL;

/// Fixed encode parameters announced to the server in `onMetaData`
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Video bitrate in bits per second
    pub video_bitrate: u32,
    pub keyframe_interval: Duration,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            // Portrait phone screen
            width: 720,
            height: 1280,
            frame_rate: 30,
            video_bitrate: 2_000_000,
            keyframe_interval: Duration::from_secs(2),
            audio_sample_rate: 44_100,
            audio_channels: 2,
        }
    }
}

impl EncodeSettings {
    /// Key-frame interval expressed in frames
    pub fn keyframe_interval_frames(&self) -> u32 {
        (self.keyframe_interval.as_secs_f64() * self.frame_rate as f64).round() as u32
    }

    /// `onMetaData` object for `@setDataFrame`
    pub fn to_metadata(&self) -> AmfValue {
        AmfValue::ecma_array([
            ("width", AmfValue::from(self.width)),
            ("height", AmfValue::from(self.height)),
            ("framerate", AmfValue::from(self.frame_rate)),
            ("videodatarate", AmfValue::from(self.video_bitrate as f64 / 1000.0)),
            ("videocodecid", AmfValue::from(7u32)),
            ("audiosamplerate", AmfValue::from(self.audio_sample_rate)),
            ("audiochannels", AmfValue::from(self.audio_channels as u32)),
            ("stereo", AmfValue::from(self.audio_channels > 1)),
            ("audiocodecid", AmfValue::from(10u32)),
            ("encoder", AmfValue::from(FLASH_VERSION)),
        ])
    }
}

/// Publish session options
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Chunk size announced after the handshake
    pub chunk_size: u32,

    /// Window acknowledgement size announced to the server
    pub window_ack_size: u32,

    /// Units buffered between the capture path and the session task
    pub media_queue_capacity: usize,

    /// Counter snapshot cadence in video units (0 = off)
    pub log_interval: u64,

    /// Upper bound on closing the stream during teardown
    pub close_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    pub encode: EncodeSettings,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            // About two seconds of video plus audio
            media_queue_capacity: 256,
            log_interval: DEFAULT_LOG_INTERVAL,
            close_timeout: Duration::from_secs(2),
            tcp_nodelay: true,
            read_buffer_size: 64 * 1024,
            encode: EncodeSettings::default(),
        }
    }
}

impl PublishConfig {
    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Set media queue capacity (at least 1)
    pub fn media_queue_capacity(mut self, capacity: usize) -> Self {
        self.media_queue_capacity = capacity.max(1);
        self
    }

    /// Set counter snapshot cadence
    pub fn log_interval(mut self, interval: u64) -> Self {
        self.log_interval = interval;
        self
    }

    /// Set stream close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set encode parameters
    pub fn encode(mut self, encode: EncodeSettings) -> Self {
        self.encode = encode;
        self
    }
}
