//! # Streaming Session
//!
//! All mutable state of one streaming connection in a single owned value:
//! the audio buffer, the carryover fragment, the running accumulation and
//! the session configuration. The controller owns it and mutates it only
//! through the methods below.

use serde::Serialize;

use super::protocol::SessionConfigUpdate;
use crate::audio::buffer::AudioBuffer;
use crate::audio::segmentation::{FlushDecision, SegmentationPolicy};
use crate::audio::vad::{VadEdge, VadStream};
use crate::transcription::Task;

/// Per-connection recording state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not recording.
    Idle,
    /// Buffering audio.
    Recording,
    /// A transcription round-trip is in flight.
    Flushing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Flushing => "flushing",
        }
    }
}

/// Client-adjustable settings of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub language: String,
    pub task: Task,
    pub braille_table: String,
    pub word_timestamps: bool,
}

impl SessionConfig {
    pub fn new(language: impl Into<String>, braille_table: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            task: Task::Transcribe,
            braille_table: braille_table.into(),
            word_timestamps: true,
        }
    }

    /// Merge `update` into this config.
    ///
    /// A `language` that is present but null or blank rejects the whole
    /// update and leaves the config untouched.
    pub fn merge(&mut self, update: SessionConfigUpdate) -> Result<(), String> {
        let language = match update.language {
            None => None,
            Some(Some(language)) if !language.trim().is_empty() => Some(language.trim().to_string()),
            Some(_) => return Err("Language is required and cannot be null or empty".to_string()),
        };

        if let Some(language) = language {
            self.language = language;
        }
        if let Some(task) = update.task {
            self.task = task;
        }
        if let Some(table) = update.braille_table {
            self.braille_table = table;
        }
        if let Some(word_timestamps) = update.word_timestamps {
            self.word_timestamps = word_timestamps;
        }
        Ok(())
    }
}

/// Everything a session reports when a recording ends with text.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub text: String,
    pub braille: String,
    pub chunks: usize,
}

pub struct StreamingSession {
    state: SessionState,
    buffer: AudioBuffer,
    policy: SegmentationPolicy,
    vad: Option<VadStream>,
    speech_ended: bool,
    carryover_enabled: bool,
    last_fragment: String,
    accumulated_text: String,
    accumulated_braille: String,
    chunks: usize,
    config: SessionConfig,
}

impl StreamingSession {
    pub fn new(
        policy: SegmentationPolicy,
        config: SessionConfig,
        carryover_enabled: bool,
        vad: Option<VadStream>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            buffer: AudioBuffer::new(policy.sample_rate),
            policy,
            vad,
            speech_ended: false,
            carryover_enabled,
            last_fragment: String::new(),
            accumulated_text: String::new(),
            accumulated_braille: String::new(),
            chunks: 0,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state != SessionState::Idle
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn policy(&self) -> &SegmentationPolicy {
        &self.policy
    }

    pub fn merge_config(&mut self, update: SessionConfigUpdate) -> Result<&SessionConfig, String> {
        self.config.merge(update)?;
        Ok(&self.config)
    }

    pub fn buffered_duration(&self) -> f64 {
        self.buffer.duration_seconds()
    }

    pub fn last_fragment(&self) -> &str {
        &self.last_fragment
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn accumulated_braille(&self) -> &str {
        &self.accumulated_braille
    }

    fn reset_recording(&mut self) {
        self.buffer.clear();
        self.speech_ended = false;
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
        self.last_fragment.clear();
        self.accumulated_text.clear();
        self.accumulated_braille.clear();
        self.chunks = 0;
    }

    /// Explicit `start_recording`: clear every recording-scoped field.
    pub fn start_recording(&mut self) {
        self.reset_recording();
        self.state = SessionState::Recording;
    }

    /// Audio arrived while idle. Returns true if this started a recording.
    pub fn begin_implicit_recording(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Recording;
        true
    }

    /// Buffer a decoded frame and ask the segmentation policy what to do.
    pub fn append_frame(&mut self, samples: Vec<f32>) -> FlushDecision {
        if samples.is_empty() {
            return FlushDecision::Wait;
        }

        if let Some(vad) = self.vad.as_mut() {
            match vad.observe(&samples).last_edge {
                Some(VadEdge::SpeechStart) => self.speech_ended = false,
                Some(VadEdge::SpeechEnd) => self.speech_ended = true,
                None => {}
            }
        }

        self.buffer.append(samples);
        self.policy.decide(self.buffer.duration_seconds(), self.speech_ended)
    }

    /// Whether the current buffer is long enough for the flush on stop.
    pub fn meets_final_minimum(&self) -> bool {
        !self.buffer.is_empty() && self.policy.meets_minimum(self.buffer.duration_seconds())
    }

    /// Take the buffered span for dispatch and enter `Flushing`.
    ///
    /// Returns `None`, keeping the frames buffered, when the span is below
    /// the dispatch floor.
    pub fn take_span(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() || !self.policy.is_dispatchable(self.buffer.duration_seconds()) {
            return None;
        }
        self.speech_ended = false;
        self.state = SessionState::Flushing;
        Some(self.buffer.take_span())
    }

    /// The flush round-trip is over, successful or not.
    pub fn finish_flush(&mut self) {
        if self.state == SessionState::Flushing {
            self.state = SessionState::Recording;
        }
    }

    /// Priming hint for the next recognizer call.
    pub fn priming_hint(&self) -> Option<String> {
        (self.carryover_enabled && !self.last_fragment.is_empty()).then(|| self.last_fragment.clone())
    }

    /// Overwrite the carryover fragment after a chunk produced text.
    pub fn update_carryover(&mut self, text: &str, last_words_hint: Option<&str>) {
        let fragment = last_words_hint
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .unwrap_or(text);
        self.last_fragment = fragment.trim().to_string();
    }

    /// Append one chunk's text and braille to the accumulation.
    pub fn accumulate(&mut self, text: &str, braille: &str) {
        append_spaced(&mut self.accumulated_text, text);
        append_spaced(&mut self.accumulated_braille, braille);
        self.chunks += 1;
    }

    /// End the recording: returns the accumulation if any text was produced
    /// and puts the session back to `Idle`.
    pub fn finish_recording(&mut self) -> Option<RecordingSummary> {
        let summary = (!self.accumulated_text.is_empty()).then(|| RecordingSummary {
            text: std::mem::take(&mut self.accumulated_text),
            braille: std::mem::take(&mut self.accumulated_braille),
            chunks: self.chunks,
        });
        self.reset_recording();
        self.state = SessionState::Idle;
        summary
    }
}

fn append_spaced(target: &mut String, piece: &str) {
    if piece.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(piece);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::segmentation::FlushReason;
    use crate::audio::vad::test_support::{params, tone, BrokenDetector};
    use crate::audio::vad::EnergyVad;

    fn policy() -> SegmentationPolicy {
        SegmentationPolicy {
            sample_rate: 16000,
            chunk_duration: 3.0,
            min_duration: 0.5,
            buffer_limit: 30.0,
            min_dispatch_duration: 0.3,
        }
    }

    fn session() -> StreamingSession {
        StreamingSession::new(policy(), SessionConfig::new("en", "builtin"), true, None)
    }

    fn seconds(s: f64) -> Vec<f32> {
        vec![0.0; (s * 16000.0) as usize]
    }

    #[test]
    fn test_three_one_second_frames_flush_on_the_third() {
        let mut session = session();
        session.start_recording();
        assert_eq!(session.append_frame(seconds(1.0)), FlushDecision::Wait);
        assert_eq!(session.append_frame(seconds(1.0)), FlushDecision::Wait);
        assert_eq!(session.buffered_duration(), 2.0);
        assert_eq!(
            session.append_frame(seconds(1.0)),
            FlushDecision::Flush(FlushReason::TargetInterval)
        );

        let span = session.take_span().unwrap();
        assert_eq!(span.len(), 48000);
        assert_eq!(session.state(), SessionState::Flushing);
        assert_eq!(session.buffered_duration(), 0.0);
        session.finish_flush();
        assert_eq!(session.state(), SessionState::Recording);
    }

    fn session_with_vad(vad: VadStream) -> StreamingSession {
        StreamingSession::new(policy(), SessionConfig::new("en", "builtin"), true, Some(vad))
    }

    #[test]
    fn test_resumed_speech_in_one_frame_does_not_flush() {
        let mut session = session_with_vad(VadStream::new(Box::new(EnergyVad::new(params()))));
        session.start_recording();
        assert_eq!(session.append_frame(tone(8192, 0.5)), FlushDecision::Wait);

        // the pause ends one utterance and the next starts inside this frame
        let mut frame = vec![0.0; 2048];
        frame.extend(tone(2048, 0.5));
        assert_eq!(session.append_frame(frame), FlushDecision::Wait);

        assert_eq!(
            session.append_frame(vec![0.0; 2048]),
            FlushDecision::Flush(FlushReason::SpeechEnd)
        );
    }

    #[test]
    fn test_failed_detector_falls_back_to_duration() {
        let mut session = session_with_vad(VadStream::new(Box::new(BrokenDetector)));
        session.start_recording();
        assert_eq!(session.append_frame(seconds(1.0)), FlushDecision::Wait);
        assert_eq!(session.append_frame(seconds(1.0)), FlushDecision::Wait);
        assert_eq!(
            session.append_frame(seconds(1.0)),
            FlushDecision::Flush(FlushReason::TargetInterval)
        );
        assert_eq!(session.take_span().map(|span| span.len()), Some(48000));
    }

    #[test]
    fn test_span_below_floor_stays_buffered() {
        let mut session = session();
        session.start_recording();
        session.append_frame(seconds(0.25));
        assert!(session.take_span().is_none());
        assert_eq!(session.buffered_duration(), 0.25);
        assert_eq!(session.state(), SessionState::Recording);
        assert!(!session.meets_final_minimum());
    }

    #[test]
    fn test_accumulation_is_space_joined_in_order() {
        let mut session = session();
        session.start_recording();
        session.accumulate("hello", "⠓⠑⠇⠇⠕");
        session.accumulate("world", "⠺⠕⠗⠇⠙");
        session.accumulate("again", "⠁⠛⠁⠊⠝");
        assert_eq!(session.accumulated_text(), "hello world again");
        assert_eq!(session.accumulated_braille(), "⠓⠑⠇⠇⠕ ⠺⠕⠗⠇⠙ ⠁⠛⠁⠊⠝");
    }

    #[test]
    fn test_start_recording_clears_everything_recording_scoped() {
        let mut session = session();
        session.start_recording();
        session.append_frame(seconds(1.0));
        session.update_carryover("previous words", None);
        session.accumulate("previous words", "⠏");

        session.start_recording();
        assert_eq!(session.buffered_duration(), 0.0);
        assert_eq!(session.last_fragment(), "");
        assert_eq!(session.accumulated_text(), "");
        assert_eq!(session.accumulated_braille(), "");
        assert!(session.is_recording());
    }

    #[test]
    fn test_carryover_prefers_hint_and_respects_switch() {
        let mut session = session();
        session.update_carryover("the whole chunk text", Some(" chunk text "));
        assert_eq!(session.priming_hint().as_deref(), Some("chunk text"));
        session.update_carryover("only text", None);
        assert_eq!(session.priming_hint().as_deref(), Some("only text"));

        let mut disabled = StreamingSession::new(policy(), SessionConfig::new("en", "builtin"), false, None);
        disabled.update_carryover("ignored", None);
        assert_eq!(disabled.priming_hint(), None);
    }

    #[test]
    fn test_empty_language_leaves_config_unchanged() {
        let mut config = SessionConfig::new("fr", "builtin");
        let update = SessionConfigUpdate {
            language: Some(Some("  ".into())),
            task: Some(Task::Translate),
            ..Default::default()
        };
        assert!(config.merge(update).is_err());
        assert_eq!(config.language, "fr");
        assert_eq!(config.task, Task::Transcribe);

        let update = SessionConfigUpdate {
            language: Some(None),
            ..Default::default()
        };
        assert!(config.merge(update).is_err());
        assert_eq!(config.language, "fr");
    }

    #[test]
    fn test_merge_keeps_unspecified_fields() {
        let mut config = SessionConfig::new("en", "en-us-g1.ctb");
        let update = SessionConfigUpdate {
            word_timestamps: Some(false),
            ..Default::default()
        };
        config.merge(update).unwrap();
        assert_eq!(config.language, "en");
        assert_eq!(config.braille_table, "en-us-g1.ctb");
        assert!(!config.word_timestamps);
    }

    #[test]
    fn test_finish_recording_returns_summary_only_with_text() {
        let mut session = session();
        session.start_recording();
        assert!(session.finish_recording().is_none());
        assert_eq!(session.state(), SessionState::Idle);

        session.start_recording();
        session.accumulate("one", "⠕⠝⠑");
        session.accumulate("two", "⠞⠺⠕");
        let summary = session.finish_recording().unwrap();
        assert_eq!(summary.text, "one two");
        assert_eq!(summary.chunks, 2);
        assert!(!session.is_recording());
        assert_eq!(session.accumulated_text(), "");
    }
}
