//! Counters for a broadcast session
//!
//! `SessionCounters` is shared between the capture path and the session task,
//! so every field is an atomic and updates never block. `TransportStats` is
//! owned by the transport and only touched from the session task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::session::sample::SampleKind;

/// Per-kind unit counts plus diagnostic forwarded/dropped counts
#[derive(Debug, Default)]
pub struct SessionCounters {
    video: AtomicU64,
    device_audio: AtomicU64,
    mic_audio: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one unit of `kind`, returning the new count for that kind
    pub fn record(&self, kind: SampleKind) -> u64 {
        let counter = match kind {
            SampleKind::Video => &self.video,
            SampleKind::DeviceAudio => &self.device_audio,
            SampleKind::MicAudio => &self.mic_audio,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            video: self.video.load(Ordering::Relaxed),
            device_audio: self.device_audio.load(Ordering::Relaxed),
            mic_audio: self.mic_audio.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub video: u64,
    pub device_audio: u64,
    pub mic_audio: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

impl CounterSnapshot {
    pub fn total(&self) -> u64 {
        self.video + self.device_audio + self.mic_audio
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "video={} device_audio={} mic_audio={} forwarded={} dropped={}",
            self.video, self.device_audio, self.mic_audio, self.forwarded, self.dropped
        )
    }
}

/// Outbound statistics kept by a transport
#[derive(Debug, Clone)]
pub struct TransportStats {
    pub started_at: Instant,
    pub bytes_sent: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
    pub keyframes: u64,
    /// Last video timestamp sent, in ms
    pub last_video_ts: u32,
    /// Last audio timestamp sent, in ms
    pub last_audio_ts: u32,
}

impl TransportStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_sent: 0,
            video_frames: 0,
            audio_frames: 0,
            keyframes: 0,
            last_video_ts: 0,
            last_audio_ts: 0,
        }
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Bits per second over `elapsed`
    pub fn bitrate_over(&self, elapsed: Duration) -> u64 {
        let secs = elapsed.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }

    /// Bits per second since the transport started
    pub fn bitrate(&self) -> u64 {
        self.bitrate_over(self.duration())
    }
}

impl Default for TransportStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_per_kind() {
        let counters = SessionCounters::new();
        assert_eq!(counters.record(SampleKind::Video), 1);
        assert_eq!(counters.record(SampleKind::Video), 2);
        assert_eq!(counters.record(SampleKind::MicAudio), 1);
        counters.record(SampleKind::DeviceAudio);
        counters.record_forwarded();
        counters.record_dropped();

        let snap = counters.snapshot();
        assert_eq!(
            snap,
            CounterSnapshot {
                video: 2,
                device_audio: 1,
                mic_audio: 1,
                forwarded: 1,
                dropped: 1,
            }
        );
        assert_eq!(snap.total(), 4);
    }

    #[test]
    fn test_counters_shared_across_threads() {
        let counters = std::sync::Arc::new(SessionCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        counters.record(SampleKind::Video);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.snapshot().video, 1000);
    }

    #[test]
    fn test_snapshot_display() {
        let snap = CounterSnapshot {
            video: 60,
            ..Default::default()
        };
        assert_eq!(
            snap.to_string(),
            "video=60 device_audio=0 mic_audio=0 forwarded=0 dropped=0"
        );
    }

    #[test]
    fn test_bitrate() {
        let mut stats = TransportStats::new();
        stats.bytes_sent = 1_000_000;
        // 1,000,000 bytes * 8 bits / 10 seconds
        assert_eq!(stats.bitrate_over(Duration::from_secs(10)), 800_000);
        assert_eq!(stats.bitrate_over(Duration::ZERO), 0);
    }
}
