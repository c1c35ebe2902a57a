//! # Audio Pipeline
//!
//! Everything that happens to audio before it reaches the speech recognizer.
//!
//! ## Key Components:
//! - **Audio Buffer**: per-session ordered frame buffer with exact duration bookkeeping
//! - **Segmentation**: decides when a buffered span is ready for transcription
//! - **Voice Activity**: optional speech/silence signal that allows earlier flushes
//! - **Audio Processor**: decoding of websocket frames and uploaded WAV files
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: configured (16kHz by default)
//! - **Encoding**: 32-bit float, little-endian
//! - **Channels**: Mono (1 channel)

pub mod buffer;
pub mod processor;
pub mod segmentation;
pub mod vad;
