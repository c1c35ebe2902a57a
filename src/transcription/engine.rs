//! # Transcription Engine
//!
//! The speech-recognition contract the rest of the server depends on, and
//! its Whisper implementation.
//!
//! ## Key Responsibilities:
//! - **Contract**: `SpeechRecognizer` takes a finished audio span plus language,
//!   task, timestamp flag and optional prompt, and returns text
//! - **Lifecycle**: the model loads in the background; `status()` reports
//!   "not loaded", "loading", "loaded" or "failed"
//! - **Concurrency**: calls from different sessions share one model; they are
//!   serialised on an async mutex and run on the blocking thread pool

use async_trait::async_trait;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::model::{DecodeOptions, ModelSize, WhisperModel};
use crate::audio::processor::resample;
use crate::device::device_label;
use candle_transformers::models::whisper as m;

/// Whisper task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Transcribe,
    Translate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Transcribe => "transcribe",
            Task::Translate => "translate",
        }
    }
}

impl std::str::FromStr for Task {
    type Err = AsrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            other => Err(AsrError::InvalidRequest(format!(
                "task must be 'transcribe' or 'translate', got '{}'",
                other
            ))),
        }
    }
}

/// A timestamped piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One transcription call.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Mono samples at `sample_rate`.
    pub audio: Vec<f32>,
    pub sample_rate: u32,
    /// Required, non-empty language code.
    pub language: String,
    pub task: Task,
    pub want_timestamps: bool,
    pub initial_prompt: Option<String>,
}

impl TranscriptionRequest {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.audio.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionOutput {
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
    pub segments: Option<Vec<Segment>>,
    /// Trailing words suited for priming the next call.
    pub last_words_hint: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum AsrError {
    #[error("ASR model is not loaded")]
    NotLoaded,
    #[error("ASR model is still loading")]
    Loading,
    #[error("ASR model failed to load: {0}")]
    LoadFailed(String),
    #[error("invalid transcription request: {0}")]
    InvalidRequest(String),
    #[error("transcription failed: {0}")]
    Inference(String),
}

/// Recognizer lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    NotLoaded,
    Loading,
    Loaded { model: String, device: String },
    Failed(String),
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::NotLoaded => "not loaded",
            EngineStatus::Loading => "loading",
            EngineStatus::Loaded { .. } => "loaded",
            EngineStatus::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Loaded { .. })
    }

    /// The error a caller gets when the engine is not ready.
    pub fn unavailable_error(&self) -> Option<AsrError> {
        match self {
            EngineStatus::Loaded { .. } => None,
            EngineStatus::NotLoaded => Some(AsrError::NotLoaded),
            EngineStatus::Loading => Some(AsrError::Loading),
            EngineStatus::Failed(reason) => Some(AsrError::LoadFailed(reason.clone())),
        }
    }
}

/// Speech recognition collaborator.
///
/// Implementations must be safe to call from many sessions at once.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn status(&self) -> EngineStatus;

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<TranscriptionOutput, AsrError>;
}

/// Where the checkpoint comes from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Hub(ModelSize),
    Directory(PathBuf),
}

impl ModelSource {
    fn display_name(&self) -> String {
        match self {
            ModelSource::Hub(size) => format!("whisper-{}", size),
            ModelSource::Directory(path) => format!(
                "whisper-{}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "local".to_string())
            ),
        }
    }
}

/// Whisper-backed recognizer.
pub struct WhisperEngine {
    model: Arc<Mutex<Option<WhisperModel>>>,
    status: RwLock<EngineStatus>,
    source: ModelSource,
    device: Device,
}

impl WhisperEngine {
    pub fn new(source: ModelSource, device: Device) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            status: RwLock::new(EngineStatus::NotLoaded),
            source,
            device,
        }
    }

    /// Load the checkpoint, updating `status()` as it goes.
    pub async fn load(&self) -> Result<(), AsrError> {
        *self.status.write().await = EngineStatus::Loading;
        let name = self.source.display_name();
        let start_time = Instant::now();
        tracing::info!(model = %name, device = device_label(&self.device), "Loading speech recognition model");

        let loaded = match &self.source {
            ModelSource::Hub(size) => WhisperModel::load(*size, self.device.clone()).await,
            ModelSource::Directory(path) => {
                let path = path.clone();
                let device = self.device.clone();
                let name = name.clone();
                tokio::task::spawn_blocking(move || WhisperModel::load_from_dir(&path, name, device))
                    .await
                    .map_err(|e| AsrError::LoadFailed(e.to_string()))?
            }
        };

        match loaded {
            Ok(model) => {
                let status = EngineStatus::Loaded {
                    model: model.name().to_string(),
                    device: device_label(model.device()).to_string(),
                };
                *self.model.lock().await = Some(model);
                *self.status.write().await = status;
                tracing::info!(
                    model = %name,
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "Speech recognition model ready"
                );
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::error!(model = %name, error = %reason, "Speech recognition model failed to load");
                *self.status.write().await = EngineStatus::Failed(reason.clone());
                Err(AsrError::LoadFailed(reason))
            }
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperEngine {
    async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<TranscriptionOutput, AsrError> {
        let language = request.language.trim().to_lowercase();
        if language.is_empty() {
            return Err(AsrError::InvalidRequest("language is required".to_string()));
        }
        if request.audio.is_empty() {
            return Err(AsrError::InvalidRequest("audio span is empty".to_string()));
        }
        if let Some(err) = self.status().await.unavailable_error() {
            return Err(err);
        }

        let duration_seconds = request.duration_seconds();
        let want_timestamps = request.want_timestamps;
        let start_time = Instant::now();
        let guard = self.model.clone().lock_owned().await;

        let transcript = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            let model = guard.as_mut().ok_or(AsrError::NotLoaded)?;
            let language_token = model.language_token(&language).ok_or_else(|| {
                AsrError::InvalidRequest(format!("unsupported language '{}'", language))
            })?;

            let pcm = resample(&request.audio, request.sample_rate, m::SAMPLE_RATE as u32)
                .map_err(|e| AsrError::Inference(e.to_string()))?;
            let options = DecodeOptions {
                language_token,
                task: request.task,
                timestamps: request.want_timestamps,
                initial_prompt: request.initial_prompt.as_deref(),
            };
            let transcript = model
                .transcribe(&pcm, &options)
                .map_err(|e| AsrError::Inference(format!("{:#}", e)))?;
            Ok::<_, AsrError>((transcript, language))
        })
        .await
        .map_err(|e| AsrError::Inference(e.to_string()))?;
        let (transcript, language) = transcript?;

        tracing::debug!(
            audio_seconds = duration_seconds,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            chars = transcript.text.len(),
            "Transcription finished"
        );

        let last_words_hint = transcript.segments.last().map(|s| s.text.clone());
        Ok(TranscriptionOutput {
            text: transcript.text,
            language,
            duration_seconds,
            segments: want_timestamps.then_some(transcript.segments),
            last_words_hint,
        })
    }
}
