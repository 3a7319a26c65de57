//! Routes sample units to encoder inputs and keeps the per-kind counters

use std::sync::Arc;

use crate::stats::{CounterSnapshot, SessionCounters};

use super::sample::SampleKind;

/// Snapshot cadence, in video units
pub const DEFAULT_LOG_INTERVAL: u64 = 60;

/// Encoder input a unit is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderInput {
    Video,
    /// Device and microphone audio share one lane
    Audio,
}

impl From<SampleKind> for EncoderInput {
    fn from(kind: SampleKind) -> Self {
        match kind {
            SampleKind::Video => EncoderInput::Video,
            SampleKind::DeviceAudio | SampleKind::MicAudio => EncoderInput::Audio,
        }
    }
}

/// Result of classifying one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub input: EncoderInput,
    /// Set on every `log_interval`-th video unit
    pub snapshot: Option<CounterSnapshot>,
}

/// Counts units by kind and picks their encoder input.
///
/// Cloning shares the counters.
#[derive(Debug, Clone)]
pub struct BufferClassifier {
    counters: Arc<SessionCounters>,
    log_interval: u64,
}

impl BufferClassifier {
    /// `log_interval` of 0 disables snapshots
    pub fn new(log_interval: u64) -> Self {
        Self::with_counters(Arc::new(SessionCounters::new()), log_interval)
    }

    pub fn with_counters(counters: Arc<SessionCounters>, log_interval: u64) -> Self {
        Self {
            counters,
            log_interval,
        }
    }

    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    pub fn log_interval(&self) -> u64 {
        self.log_interval
    }

    pub fn classify(&self, kind: SampleKind) -> Classified {
        let count = self.counters.record(kind);

        let snapshot = if kind == SampleKind::Video
            && self.log_interval > 0
            && count % self.log_interval == 0
        {
            let snapshot = self.counters.snapshot();
            tracing::debug!(
                video = snapshot.video,
                device_audio = snapshot.device_audio,
                mic_audio = snapshot.mic_audio,
                forwarded = snapshot.forwarded,
                dropped = snapshot.dropped,
                "Sample counters"
            );
            Some(snapshot)
        } else {
            None
        };

        Classified {
            input: kind.into(),
            snapshot,
        }
    }
}

impl Default for BufferClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing() {
        let classifier = BufferClassifier::default();
        assert_eq!(classifier.classify(SampleKind::Video).input, EncoderInput::Video);
        assert_eq!(
            classifier.classify(SampleKind::DeviceAudio).input,
            EncoderInput::Audio
        );
        assert_eq!(
            classifier.classify(SampleKind::MicAudio).input,
            EncoderInput::Audio
        );
    }

    #[test]
    fn test_snapshot_every_interval() {
        let classifier = BufferClassifier::new(60);
        let mut snapshots = Vec::new();
        for _ in 0..600 {
            if let Some(snap) = classifier.classify(SampleKind::Video).snapshot {
                snapshots.push(snap);
            }
        }

        assert_eq!(snapshots.len(), 10);
        assert_eq!(snapshots[0].video, 60);
        assert_eq!(snapshots[9].video, 600);
    }

    #[test]
    fn test_audio_never_snapshots() {
        let classifier = BufferClassifier::new(1);
        assert!(classifier.classify(SampleKind::MicAudio).snapshot.is_none());
        assert!(classifier.classify(SampleKind::Video).snapshot.is_some());
    }

    #[test]
    fn test_zero_interval_disables_snapshots() {
        let classifier = BufferClassifier::new(0);
        for _ in 0..120 {
            assert!(classifier.classify(SampleKind::Video).snapshot.is_none());
        }
        assert_eq!(classifier.counters().snapshot().video, 120);
    }

    #[test]
    fn test_clones_share_counters() {
        let classifier = BufferClassifier::default();
        let other = classifier.clone();
        other.classify(SampleKind::DeviceAudio);
        assert_eq!(classifier.counters().snapshot().device_audio, 1);
    }
}
