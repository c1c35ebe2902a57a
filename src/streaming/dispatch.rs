//! Calls into the two collaborators on behalf of a session: the speech
//! recognizer for a flushed span, then the braille translator for the text
//! it produced.

use std::sync::Arc;

use super::session::SessionConfig;
use crate::braille::{BrailleError, BrailleTranslator};
use crate::transcription::{AsrError, SpeechRecognizer, TranscriptionOutput, TranscriptionRequest};

#[derive(Clone)]
pub struct TranscriptionDispatcher {
    recognizer: Arc<dyn SpeechRecognizer>,
    sample_rate: u32,
}

impl TranscriptionDispatcher {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, sample_rate: u32) -> Self {
        Self {
            recognizer,
            sample_rate,
        }
    }

    /// Transcribe one span with the session's language, task and timestamp flag.
    pub async fn dispatch(
        &self,
        span: Vec<f32>,
        config: &SessionConfig,
        initial_prompt: Option<String>,
    ) -> Result<TranscriptionOutput, AsrError> {
        if config.language.trim().is_empty() {
            return Err(AsrError::InvalidRequest("language is required".to_string()));
        }

        self.recognizer
            .transcribe(TranscriptionRequest {
                audio: span,
                sample_rate: self.sample_rate,
                language: config.language.clone(),
                task: config.task,
                want_timestamps: config.word_timestamps,
                initial_prompt,
            })
            .await
    }
}

#[derive(Clone)]
pub struct TranslationAdapter {
    translator: Arc<dyn BrailleTranslator>,
}

impl TranslationAdapter {
    pub fn new(translator: Arc<dyn BrailleTranslator>) -> Self {
        Self { translator }
    }

    /// Translate a single chunk's text, never the accumulation.
    pub async fn translate_chunk(&self, text: &str, table: &str) -> Result<String, BrailleError> {
        self.translator.translate(text, table).await
    }
}
