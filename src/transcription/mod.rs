//! # Transcription Module
//!
//! Speech-to-text behind the `SpeechRecognizer` trait, implemented with
//! Whisper on the Candle-rs framework.
//!
//! ## Key Components:
//! - **engine**: recognizer contract, request/response types, `WhisperEngine`
//! - **model**: checkpoint loading and greedy decoding
//! - **mel**: mel filter bank for the audio front end

pub mod engine;
pub mod mel;
pub mod model;

pub use engine::{
    AsrError, EngineStatus, ModelSource, Segment, SpeechRecognizer, Task, TranscriptionOutput,
    TranscriptionRequest, WhisperEngine,
};
pub use model::ModelSize;
