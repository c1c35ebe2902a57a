//! # Configuration Management
//!
//! Loads the server configuration from layered sources:
//! - Default values (built into the code)
//! - `config.toml` in the working directory (optional)
//! - Environment variables with the `S2B_` prefix
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: the same structs are read from TOML, environment and JSON
//! - **Nested sections**: each concern (streaming, vad, braille...) gets its own struct
//! - **Result<T, E>**: loading and validation return errors instead of panicking
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables, `__` between nesting levels
//!    (e.g. `S2B_STREAMING__CHUNK_DURATION=2.5`, `S2B_ASR__MODEL=small`)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::audio::segmentation::SegmentationPolicy;
use crate::audio::vad::VadParams;

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub asr: AsrConfig,
    pub streaming: StreamingConfig,
    pub vad: VadConfig,
    pub braille: BrailleConfig,
    pub cors: CorsConfig,
    pub performance: PerformanceConfig,
}

/// Bind address of the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech recognition settings.
///
/// ## Fields:
/// - `model`: Whisper size ("tiny", "base", "small", "medium", "large-v3", ...)
/// - `model_path`: local directory holding `config.json`, `tokenizer.json` and
///   `model.safetensors`; when absent the files are fetched from the Hugging Face hub
/// - `device`: "auto", "cpu", "cuda" or "metal"
/// - `default_language`: language used by HTTP uploads that do not name one,
///   and the initial language of every streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    pub model: String,
    pub model_path: Option<String>,
    pub device: String,
    pub default_language: String,
}

/// Streaming segmentation parameters, all durations in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub sample_rate: u32,
    /// Target flush interval.
    pub chunk_duration: f64,
    /// Floor below which a regular flush is skipped.
    pub min_duration: f64,
    /// Hard ceiling that forces a flush.
    pub buffer_limit: f64,
    /// Spans shorter than this are never dispatched.
    pub min_dispatch_duration: f64,
    pub use_context_carryover: bool,
}

/// Voice-activity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    pub speech_pad_ms: u32,
    pub frame_size_samples: usize,
}

/// Which braille translation backend serves requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrailleBackend {
    /// The liblouis command-line translator.
    Liblouis,
    /// The in-process uncontracted translator.
    Builtin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrailleConfig {
    pub backend: BrailleBackend,
    pub default_table: String,
    pub table_directories: Vec<String>,
    pub translator_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub max_age: usize,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: streaming connections accepted at the same time
/// - `max_upload_bytes`: largest audio file accepted by the upload endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            asr: AsrConfig {
                model: "base".to_string(),
                model_path: None,
                device: "auto".to_string(),
                default_language: "en".to_string(),
            },
            streaming: StreamingConfig {
                sample_rate: 16000,
                chunk_duration: 3.0,
                min_duration: 0.5,
                buffer_limit: 30.0,
                min_dispatch_duration: 0.3,
                use_context_carryover: true,
            },
            vad: VadConfig {
                enabled: false,
                threshold: 0.5,
                min_speech_duration_ms: 250,
                min_silence_duration_ms: 500,
                speech_pad_ms: 100,
                frame_size_samples: 512,
            },
            braille: BrailleConfig {
                backend: BrailleBackend::Liblouis,
                default_table: "en-ueb-g2.ctb".to_string(),
                table_directories: vec![
                    "/usr/share/liblouis/tables".to_string(),
                    "/usr/local/share/liblouis/tables".to_string(),
                    "/opt/homebrew/share/liblouis/tables".to_string(),
                ],
                translator_command: "lou_translate".to_string(),
            },
            cors: CorsConfig {
                allow_origins: vec!["*".to_string()],
                max_age: 3600,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
                max_upload_bytes: 50 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `S2B_SERVER__PORT=9000`
    /// - `S2B_VAD__ENABLED=true`
    /// - `S2B_BRAILLE__TABLE_DIRECTORIES=/srv/tables,/usr/share/liblouis/tables`
    /// - `HOST=0.0.0.0` / `PORT=3000`: special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("S2B")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allow_origins")
                    .with_list_parse_key("braille.table_directories"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values the streaming pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.asr.default_language.trim().is_empty() {
            return Err(anyhow::anyhow!("Default ASR language cannot be empty"));
        }

        self.streaming.validate()?;
        self.vad.validate()?;

        if self.braille.default_table.trim().is_empty() {
            return Err(anyhow::anyhow!("Default braille table cannot be empty"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON document to the runtime-tunable sections.
    ///
    /// Only `streaming` and `vad` can change at runtime; new values apply to
    /// connections opened afterwards. For example `{"streaming": {"chunk_duration": 2.0}}`
    /// changes only the flush interval.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(streaming) = partial_config.get("streaming") {
            if let Some(value) = streaming.get("chunk_duration").and_then(|v| v.as_f64()) {
                self.streaming.chunk_duration = value;
            }
            if let Some(value) = streaming.get("min_duration").and_then(|v| v.as_f64()) {
                self.streaming.min_duration = value;
            }
            if let Some(value) = streaming.get("buffer_limit").and_then(|v| v.as_f64()) {
                self.streaming.buffer_limit = value;
            }
            if let Some(value) = streaming.get("use_context_carryover").and_then(|v| v.as_bool()) {
                self.streaming.use_context_carryover = value;
            }
        }

        if let Some(vad) = partial_config.get("vad") {
            if let Some(enabled) = vad.get("enabled").and_then(|v| v.as_bool()) {
                self.vad.enabled = enabled;
            }
            if let Some(threshold) = vad.get("threshold").and_then(|v| v.as_f64()) {
                self.vad.threshold = threshold as f32;
            }
            if let Some(ms) = vad.get("min_silence_duration_ms").and_then(|v| v.as_u64()) {
                self.vad.min_silence_duration_ms = ms as u32;
            }
            if let Some(ms) = vad.get("speech_pad_ms").and_then(|v| v.as_u64()) {
                self.vad.speech_pad_ms = ms as u32;
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl StreamingConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }
        if self.chunk_duration <= 0.0 {
            return Err(anyhow::anyhow!("Chunk duration must be positive"));
        }
        if self.min_dispatch_duration <= 0.0 || self.min_dispatch_duration > self.min_duration {
            return Err(anyhow::anyhow!(
                "Minimum dispatch duration must be positive and not exceed min_duration ({})",
                self.min_duration
            ));
        }
        if self.buffer_limit < self.chunk_duration {
            return Err(anyhow::anyhow!(
                "Buffer limit ({}) must not be shorter than the chunk duration ({})",
                self.buffer_limit,
                self.chunk_duration
            ));
        }
        Ok(())
    }

    /// Segmentation parameters handed to every new session.
    pub fn policy(&self) -> SegmentationPolicy {
        SegmentationPolicy {
            sample_rate: self.sample_rate,
            chunk_duration: self.chunk_duration,
            min_duration: self.min_duration,
            buffer_limit: self.buffer_limit,
            min_dispatch_duration: self.min_dispatch_duration,
        }
    }
}

impl VadConfig {
    fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(anyhow::anyhow!("VAD threshold must be between 0 and 1"));
        }
        if self.frame_size_samples == 0 {
            return Err(anyhow::anyhow!("VAD frame size must be greater than 0"));
        }
        Ok(())
    }

    /// Detector parameters for the given stream sample rate.
    pub fn params(&self, sample_rate: u32) -> VadParams {
        VadParams {
            sample_rate,
            threshold: self.threshold,
            min_speech_duration_ms: self.min_speech_duration_ms,
            min_silence_duration_ms: self.min_silence_duration_ms,
            speech_pad_ms: self.speech_pad_ms,
            frame_size_samples: self.frame_size_samples,
        }
    }
}
