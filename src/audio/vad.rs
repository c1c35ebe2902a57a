//! # Voice Activity Detection
//!
//! Optional speech/silence signal used to flush a chunk as soon as an
//! utterance ends instead of waiting for the target interval.
//!
//! ## Key Components:
//! - **VoiceActivityDetector**: per-frame contract (fixed-size frame in, signal out)
//! - **EnergyVad**: RMS-energy detector with start/end hysteresis
//! - **FailOpenVad**: wraps any detector; after an error it reports "speech" forever
//! - **VadStream**: slices arbitrary-sized audio frames into detector frames
//!
//! A failing detector never surfaces to the client. Segmentation simply falls
//! back to the duration-only rule.

use thiserror::Error;
use tracing::warn;

use crate::config::VadConfig;

/// Level mapped to probability 0.0.
const ENERGY_FLOOR_DB: f32 = -60.0;
/// Level mapped to probability 1.0.
const ENERGY_CEIL_DB: f32 = -20.0;
/// Gap between the speech threshold and the silence threshold.
const HYSTERESIS: f32 = 0.15;

/// Detector parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadParams {
    pub sample_rate: u32,
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    pub speech_pad_ms: u32,
    pub frame_size_samples: usize,
}

impl VadParams {
    fn samples_for_ms(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

/// Result of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VadSignal {
    pub is_speech: bool,
    pub probability: f32,
    /// Set on the frame where an utterance is confirmed to have started.
    pub speech_start: bool,
    /// Set on the frame where enough trailing silence confirmed the end.
    pub speech_end: bool,
}

impl VadSignal {
    /// What a degraded detector reports.
    pub fn assume_speech() -> Self {
        Self {
            is_speech: true,
            probability: 1.0,
            speech_start: false,
            speech_end: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum VadError {
    #[error("frame has {got} samples, detector expects {expected}")]
    FrameSize { expected: usize, got: usize },
    #[error("voice activity inference failed: {0}")]
    Inference(String),
}

/// Frame-level speech classifier.
pub trait VoiceActivityDetector: Send {
    fn process_frame(&mut self, frame: &[f32]) -> Result<VadSignal, VadError>;
    fn reset(&mut self);
    fn frame_size(&self) -> usize;
}

/// Root-mean-square level detector.
///
/// Speech starts after `min_speech_duration_ms` of consecutive frames above
/// the threshold and ends after `min_silence_duration_ms + speech_pad_ms`
/// below `threshold - 0.15`.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    params: VadParams,
    triggered: bool,
    speech_samples: usize,
    silence_samples: usize,
}

impl EnergyVad {
    pub fn new(params: VadParams) -> Self {
        Self {
            params,
            triggered: false,
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.triggered
    }
}

/// Map the RMS level of `frame` onto `[0, 1]`.
pub fn energy_probability(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let mean_square = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
    let dbfs = 20.0 * mean_square.sqrt().max(1e-10).log10();
    ((dbfs - ENERGY_FLOOR_DB) / (ENERGY_CEIL_DB - ENERGY_FLOOR_DB)).clamp(0.0, 1.0)
}

impl VoiceActivityDetector for EnergyVad {
    fn process_frame(&mut self, frame: &[f32]) -> Result<VadSignal, VadError> {
        if frame.len() != self.params.frame_size_samples {
            return Err(VadError::FrameSize {
                expected: self.params.frame_size_samples,
                got: frame.len(),
            });
        }
        if frame.iter().any(|s| !s.is_finite()) {
            return Err(VadError::Inference("non-finite sample in frame".to_string()));
        }

        let probability = energy_probability(frame);
        let is_speech = probability >= self.params.threshold;
        let silence_threshold = (self.params.threshold - HYSTERESIS).max(0.01);
        let mut signal = VadSignal {
            is_speech,
            probability,
            ..VadSignal::default()
        };

        if is_speech {
            self.silence_samples = 0;
            if !self.triggered {
                self.speech_samples += frame.len();
                if self.speech_samples >= self.params.samples_for_ms(self.params.min_speech_duration_ms) {
                    self.triggered = true;
                    signal.speech_start = true;
                }
            }
        } else if !self.triggered {
            self.speech_samples = 0;
        } else if probability < silence_threshold {
            self.silence_samples += frame.len();
            let needed = self.params.samples_for_ms(
                self.params.min_silence_duration_ms + self.params.speech_pad_ms,
            );
            if self.silence_samples >= needed {
                self.triggered = false;
                self.speech_samples = 0;
                self.silence_samples = 0;
                signal.speech_end = true;
            }
        }

        Ok(signal)
    }

    fn reset(&mut self) {
        self.triggered = false;
        self.speech_samples = 0;
        self.silence_samples = 0;
    }

    fn frame_size(&self) -> usize {
        self.params.frame_size_samples
    }
}

/// Detector guard that degrades to "assume speech" on the first error.
pub struct FailOpenVad {
    inner: Box<dyn VoiceActivityDetector>,
    degraded: bool,
}

impl FailOpenVad {
    pub fn new(inner: Box<dyn VoiceActivityDetector>) -> Self {
        Self {
            inner,
            degraded: false,
        }
    }

    pub fn process_frame(&mut self, frame: &[f32]) -> VadSignal {
        if self.degraded {
            return VadSignal::assume_speech();
        }
        match self.inner.process_frame(frame) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "Voice activity detector failed, falling back to duration-based segmentation");
                self.degraded = true;
                VadSignal::assume_speech()
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }

    pub fn frame_size(&self) -> usize {
        self.inner.frame_size()
    }
}

/// Utterance boundary reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEdge {
    SpeechStart,
    SpeechEnd,
}

/// Edges seen while observing one incoming audio frame.
///
/// One audio frame spans several detector frames, so it can both end an
/// utterance and start the next one. Only the last edge describes where the
/// stream stands afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VadObservation {
    pub last_edge: Option<VadEdge>,
}

impl VadObservation {
    fn record(&mut self, signal: &VadSignal) {
        if signal.speech_start {
            self.last_edge = Some(VadEdge::SpeechStart);
        }
        if signal.speech_end {
            self.last_edge = Some(VadEdge::SpeechEnd);
        }
    }
}

/// Feeds arbitrarily sized audio into a fixed-frame detector.
///
/// Samples that do not fill a whole detector frame are carried over to the
/// next call.
pub struct VadStream {
    detector: FailOpenVad,
    pending: Vec<f32>,
}

impl VadStream {
    pub fn new(detector: Box<dyn VoiceActivityDetector>) -> Self {
        Self {
            detector: FailOpenVad::new(detector),
            pending: Vec::new(),
        }
    }

    /// Build the per-session stream from configuration, `None` when disabled.
    pub fn from_config(config: &VadConfig, sample_rate: u32) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(Box::new(EnergyVad::new(config.params(sample_rate)))))
    }

    pub fn observe(&mut self, samples: &[f32]) -> VadObservation {
        let mut observation = VadObservation::default();
        let frame_size = self.detector.frame_size();
        if frame_size == 0 {
            return observation;
        }

        self.pending.extend_from_slice(samples);
        let whole = self.pending.len() / frame_size * frame_size;
        for frame in self.pending[..whole].chunks_exact(frame_size) {
            let signal = self.detector.process_frame(frame);
            observation.record(&signal);
        }
        self.pending.drain(..whole);
        observation
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.pending.clear();
    }

    pub fn is_degraded(&self) -> bool {
        self.detector.is_degraded()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{params, tone, BrokenDetector};
    use super::*;

    #[test]
    fn test_energy_probability_range() {
        assert_eq!(energy_probability(&[0.0; 512]), 0.0);
        assert!(energy_probability(&tone(512, 0.5)) > 0.9);
        assert!(energy_probability(&tone(512, 0.001)) < 0.5);
    }

    #[test]
    fn test_speech_start_and_end_edges() {
        let mut vad = EnergyVad::new(params());
        let loud = tone(512, 0.5);
        let silent = vec![0.0; 512];

        // 64 ms at 16 kHz is 1024 samples, two frames
        assert!(!vad.process_frame(&loud).unwrap().speech_start);
        assert!(vad.process_frame(&loud).unwrap().speech_start);
        assert!(vad.in_speech());

        // 96 ms is 1536 samples, three frames
        assert!(!vad.process_frame(&silent).unwrap().speech_end);
        assert!(!vad.process_frame(&silent).unwrap().speech_end);
        assert!(vad.process_frame(&silent).unwrap().speech_end);
        assert!(!vad.in_speech());
    }

    #[test]
    fn test_wrong_frame_size_is_an_error() {
        let mut vad = EnergyVad::new(params());
        assert!(matches!(
            vad.process_frame(&[0.0; 100]),
            Err(VadError::FrameSize { expected: 512, got: 100 })
        ));
    }

    #[test]
    fn test_fail_open_assumes_speech() {
        let mut vad = FailOpenVad::new(Box::new(BrokenDetector));
        let signal = vad.process_frame(&[0.0; 512]);
        assert_eq!(signal, VadSignal::assume_speech());
        assert!(vad.is_degraded());
        assert!(!vad.process_frame(&[0.0; 512]).speech_end);
    }

    #[test]
    fn test_stream_carries_partial_frames() {
        let mut stream = VadStream::new(Box::new(EnergyVad::new(params())));
        let loud = tone(700, 0.5);
        // 700 samples: one full frame, 188 carried
        assert_eq!(stream.observe(&loud).last_edge, None);
        // 188 + 700 = 888: one more full frame, speech confirmed
        assert_eq!(stream.observe(&loud).last_edge, Some(VadEdge::SpeechStart));

        let observation = stream.observe(&vec![0.0; 16000]);
        assert_eq!(observation.last_edge, Some(VadEdge::SpeechEnd));
        assert!(!stream.is_degraded());
    }

    #[test]
    fn test_later_edge_wins_within_one_frame() {
        let mut stream = VadStream::new(Box::new(EnergyVad::new(params())));
        assert_eq!(stream.observe(&tone(1024, 0.5)).last_edge, Some(VadEdge::SpeechStart));

        // silence ends the utterance, then the next one starts
        let mut samples = vec![0.0; 2048];
        samples.extend(tone(2048, 0.5));
        let observation = stream.observe(&samples);
        assert_eq!(observation.last_edge, Some(VadEdge::SpeechStart));

        // and the reverse order reports the end
        let mut samples = vec![0.0; 2048];
        samples.extend(tone(2048, 0.5));
        samples.extend(vec![0.0; 2048]);
        assert_eq!(stream.observe(&samples).last_edge, Some(VadEdge::SpeechEnd));
    }

    #[test]
    fn test_broken_detector_reports_no_edges() {
        let mut stream = VadStream::new(Box::new(BrokenDetector));
        assert_eq!(stream.observe(&tone(4096, 0.5)).last_edge, None);
        assert!(stream.is_degraded());
        assert_eq!(stream.observe(&vec![0.0; 4096]).last_edge, None);
    }

    #[test]
    fn test_disabled_config_builds_no_stream() {
        let config = crate::config::AppConfig::default().vad;
        assert!(!config.enabled);
        assert!(VadStream::from_config(&config, 16000).is_none());
    }
}
