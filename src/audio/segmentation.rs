//! # Segmentation Controller
//!
//! Pure decision logic: given how much audio is buffered (and, optionally,
//! whether the voice-activity detector just saw speech end), decide whether
//! the buffer should be flushed to the recognizer.
//!
//! ## Decision rule (evaluated after every appended frame):
//! 1. **Target interval**: buffered ≥ `chunk_duration` and buffered ≥ `min_duration`
//! 2. **Buffer limit**: buffered ≥ `buffer_limit`, regardless of `min_duration`
//! 3. **Speech end**: the detector reported the end of an utterance and
//!    buffered ≥ `min_duration`
//!
//! Independently of the rule, no span shorter than `min_dispatch_duration`
//! is ever dispatched.

use serde::Serialize;

/// Segmentation parameters, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentationPolicy {
    pub sample_rate: u32,
    pub chunk_duration: f64,
    pub min_duration: f64,
    pub buffer_limit: f64,
    pub min_dispatch_duration: f64,
}

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    TargetInterval,
    BufferLimit,
    SpeechEnd,
    /// Remainder flushed by `stop_recording`.
    RecordingStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Wait,
    Flush(FlushReason),
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::TargetInterval => "target_interval",
            FlushReason::BufferLimit => "buffer_limit",
            FlushReason::SpeechEnd => "speech_end",
            FlushReason::RecordingStopped => "recording_stopped",
        }
    }
}

impl SegmentationPolicy {
    /// Decide whether `buffered_seconds` of audio should be flushed now.
    pub fn decide(&self, buffered_seconds: f64, speech_ended: bool) -> FlushDecision {
        if buffered_seconds >= self.chunk_duration && buffered_seconds >= self.min_duration {
            return FlushDecision::Flush(FlushReason::TargetInterval);
        }
        if buffered_seconds >= self.buffer_limit {
            return FlushDecision::Flush(FlushReason::BufferLimit);
        }
        if speech_ended && buffered_seconds >= self.min_duration {
            return FlushDecision::Flush(FlushReason::SpeechEnd);
        }
        FlushDecision::Wait
    }

    /// Whether a span is long enough to be worth an inference call.
    pub fn is_dispatchable(&self, span_seconds: f64) -> bool {
        span_seconds >= self.min_dispatch_duration
    }

    /// Whether the remainder at `stop_recording` gets a final flush.
    pub fn meets_minimum(&self, buffered_seconds: f64) -> bool {
        buffered_seconds >= self.min_duration && self.is_dispatchable(buffered_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SegmentationPolicy {
        SegmentationPolicy {
            sample_rate: 16000,
            chunk_duration: 3.0,
            min_duration: 0.5,
            buffer_limit: 30.0,
            min_dispatch_duration: 0.3,
        }
    }

    #[test]
    fn test_target_interval() {
        let p = policy();
        assert_eq!(p.decide(1.0, false), FlushDecision::Wait);
        assert_eq!(p.decide(2.0, false), FlushDecision::Wait);
        assert_eq!(
            p.decide(3.0, false),
            FlushDecision::Flush(FlushReason::TargetInterval)
        );
    }

    #[test]
    fn test_min_duration_blocks_target_interval() {
        let p = SegmentationPolicy {
            chunk_duration: 0.2,
            min_duration: 0.5,
            ..policy()
        };
        assert_eq!(p.decide(0.4, false), FlushDecision::Wait);
        assert_eq!(
            p.decide(0.5, false),
            FlushDecision::Flush(FlushReason::TargetInterval)
        );
    }

    #[test]
    fn test_buffer_limit_overrides_min_duration() {
        let p = SegmentationPolicy {
            chunk_duration: 3.0,
            min_duration: 45.0,
            buffer_limit: 30.0,
            ..policy()
        };
        assert_eq!(p.decide(29.9, false), FlushDecision::Wait);
        assert_eq!(
            p.decide(30.0, false),
            FlushDecision::Flush(FlushReason::BufferLimit)
        );
    }

    #[test]
    fn test_speech_end_allows_early_flush_above_minimum() {
        let p = policy();
        assert_eq!(p.decide(0.4, true), FlushDecision::Wait);
        assert_eq!(
            p.decide(1.2, true),
            FlushDecision::Flush(FlushReason::SpeechEnd)
        );
        assert_eq!(p.decide(1.2, false), FlushDecision::Wait);
    }

    #[test]
    fn test_dispatch_floor() {
        let p = policy();
        assert!(!p.is_dispatchable(0.29));
        assert!(p.is_dispatchable(0.3));
        assert!(!p.meets_minimum(0.4));
        assert!(p.meets_minimum(0.5));
    }
}
