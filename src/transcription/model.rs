//! # Whisper Model
//!
//! Loads a Whisper checkpoint with candle and runs greedy decoding over
//! 30-second mel windows.
//!
//! ## Model Loading Process:
//! 1. Resolve `config.json`, `tokenizer.json` and `model.safetensors`
//!    (local directory or Hugging Face hub cache)
//! 2. Build the mel filter bank for the checkpoint's number of mel bins
//! 3. Memory-map the weights onto the selected device
//!
//! ## Decoding:
//! - Prefix: optional `<|startofprev|>` + prompt, then SOT, language, task and
//!   (without timestamps) `<|notimestamps|>`
//! - Greedy argmax with the checkpoint's suppress tokens
//! - Windows judged as silence (high no-speech probability, low average
//!   log-probability) contribute no text
//! - Each window after the first is primed with the previous window's text

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::{ops::softmax, VarBuilder};
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use super::engine::{Segment, Task};
use super::mel::whisper_mel_filters;

const START_OF_PREV_TOKEN: &str = "<|startofprev|>";
/// Seconds per timestamp token step.
const TIMESTAMP_RESOLUTION: f64 = 0.02;

/// Available Whisper checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    LargeV2,
    LargeV3,
    LargeV3Turbo,
}

impl ModelSize {
    /// Hugging Face repository holding the safetensors checkpoint.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::LargeV2 => "openai/whisper-large-v2",
            ModelSize::LargeV3 => "openai/whisper-large-v3",
            ModelSize::LargeV3Turbo => "openai/whisper-large-v3-turbo",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::LargeV2 => "large-v2",
            ModelSize::LargeV3 => "large-v3",
            ModelSize::LargeV3Turbo => "large-v3-turbo",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" | "large-v2" => Ok(ModelSize::LargeV2),
            "large-v3" => Ok(ModelSize::LargeV3),
            "turbo" | "large-v3-turbo" => Ok(ModelSize::LargeV3Turbo),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-call decoding options.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions<'a> {
    pub language_token: u32,
    pub task: Task,
    pub timestamps: bool,
    pub initial_prompt: Option<&'a str>,
}

/// Text and (when requested) timestamped segments for a whole span.
#[derive(Debug, Clone, Default)]
pub struct ModelTranscript {
    pub text: String,
    pub segments: Vec<Segment>,
}

struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    translate: u32,
    no_timestamps: u32,
    no_speech: u32,
    start_of_prev: Option<u32>,
}

struct WindowResult {
    tokens: Vec<u32>,
    avg_logprob: f64,
    no_speech_prob: f64,
}

/// A loaded Whisper checkpoint.
///
/// Decoding mutates the cross-attention cache, so calls need `&mut self`;
/// the engine serialises access behind a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    suppress_plain: Tensor,
    suppress_timestamps: Tensor,
    name: String,
}

impl WhisperModel {
    /// Fetch a checkpoint from the Hugging Face hub (or its local cache) and load it.
    ///
    /// Honours `HF_TOKEN` and `HF_HUB_CACHE`.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        use hf_hub::api::tokio::ApiBuilder;

        tracing::info!(model = %size, repo = size.repo_name(), "Fetching Whisper checkpoint");
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(PathBuf::from(cache_dir));
        }
        let api = builder.build()?;
        let repo = api.model(size.repo_name().to_string());

        let config_path = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let name = format!("whisper-{}", size);
        tokio::task::spawn_blocking(move || {
            Self::from_files(&config_path, &tokenizer_path, &weights_path, name, device)
        })
        .await
        .map_err(|e| anyhow!("Model loading task failed: {}", e))?
    }

    /// Load a checkpoint from a directory with the three standard files.
    pub fn load_from_dir(dir: &Path, name: String, device: Device) -> Result<Self> {
        Self::from_files(
            &dir.join("config.json"),
            &dir.join("tokenizer.json"),
            &dir.join("model.safetensors"),
            name,
            device,
        )
    }

    fn from_files(
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
        name: String,
        device: Device,
    ) -> Result<Self> {
        let start_time = std::time::Instant::now();

        let config: Config = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let mel_filters = whisper_mel_filters(config.num_mel_bins);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let no_speech = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
            .ok_or_else(|| anyhow!("Tokenizer has no no-speech token"))?;
        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            translate: token_id(&tokenizer, m::TRANSLATE_TOKEN)?,
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            no_speech,
            start_of_prev: tokenizer.token_to_id(START_OF_PREV_TOKEN),
        };

        let suppress_plain = suppress_mask(&config, None, &device)?;
        let suppress_timestamps = suppress_mask(&config, Some(tokens.no_timestamps), &device)?;

        tracing::info!(
            model = %name,
            mel_bins = config.num_mel_bins,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Whisper checkpoint loaded"
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            tokens,
            suppress_plain,
            suppress_timestamps,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Token for a language code such as `en`, if the checkpoint knows it.
    pub fn language_token(&self, language: &str) -> Option<u32> {
        self.tokenizer
            .token_to_id(&format!("<|{}|>", language.trim().to_lowercase()))
    }

    /// Transcribe 16 kHz mono samples.
    pub fn transcribe(&mut self, pcm: &[f32], options: &DecodeOptions<'_>) -> Result<ModelTranscript> {
        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;
        let (_, _, content_frames) = mel.dims3()?;
        let audio_frames = pcm.len().div_ceil(m::HOP_LENGTH).min(content_frames);

        let mut transcript = ModelTranscript::default();
        let mut texts: Vec<String> = Vec::new();
        let mut prompt = options.initial_prompt.map(str::to_string);
        let mut seek = 0;

        while seek < audio_frames {
            let time_offset = (seek * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64;
            let segment_size = usize::min(content_frames - seek, m::N_FRAMES);
            let window = mel.narrow(2, seek, segment_size)?;
            let window_end = (((seek + segment_size) * m::HOP_LENGTH).min(pcm.len())) as f64
                / m::SAMPLE_RATE as f64;
            seek += segment_size;

            let prefix = self.prefix_tokens(options, prompt.as_deref())?;
            let result = self.decode_window(&window, &prefix, options.timestamps)?;
            if result.no_speech_prob > m::NO_SPEECH_THRESHOLD
                && result.avg_logprob < m::LOGPROB_THRESHOLD
            {
                tracing::debug!(
                    offset = time_offset,
                    no_speech_prob = result.no_speech_prob,
                    "Window judged as silence"
                );
                continue;
            }

            let text = self.decode_text(&result.tokens)?;
            if options.timestamps {
                let first_id = transcript.segments.len();
                let segments = self.split_segments(&result.tokens, time_offset, window_end, first_id)?;
                transcript.segments.extend(segments);
            }
            if !text.is_empty() {
                prompt = Some(text.clone());
                texts.push(text);
            }
        }

        transcript.text = texts.join(" ");
        Ok(transcript)
    }

    fn prefix_tokens(&self, options: &DecodeOptions<'_>, prompt: Option<&str>) -> Result<Vec<u32>> {
        let mut tokens = Vec::new();
        if let (Some(start_of_prev), Some(prompt)) = (self.tokens.start_of_prev, prompt) {
            let prompt = prompt.trim();
            if !prompt.is_empty() {
                let encoded = self
                    .tokenizer
                    .encode(format!(" {}", prompt), false)
                    .map_err(|e| anyhow!("Failed to tokenize prompt: {}", e))?;
                let ids = encoded.get_ids();
                let max_prompt = self.config.max_target_positions / 2 - 1;
                tokens.push(start_of_prev);
                tokens.extend_from_slice(&ids[ids.len().saturating_sub(max_prompt)..]);
            }
        }

        tokens.push(self.tokens.sot);
        tokens.push(options.language_token);
        tokens.push(match options.task {
            Task::Transcribe => self.tokens.transcribe,
            Task::Translate => self.tokens.translate,
        });
        if !options.timestamps {
            tokens.push(self.tokens.no_timestamps);
        }
        Ok(tokens)
    }

    fn decode_window(&mut self, mel: &Tensor, prefix: &[u32], timestamps: bool) -> Result<WindowResult> {
        let audio_features = self.model.encoder.forward(mel, true)?;
        let sot_index = prefix
            .iter()
            .position(|&t| t == self.tokens.sot)
            .unwrap_or(0);
        let suppress = if timestamps {
            &self.suppress_timestamps
        } else {
            &self.suppress_plain
        };

        let sample_len = self.config.max_target_positions / 2;
        let mut tokens = prefix.to_vec();
        let mut generated = Vec::new();
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;

        for i in 0..sample_len {
            if tokens.len() >= self.config.max_target_positions {
                break;
            }
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                let logits = self
                    .model
                    .decoder
                    .final_linear(&ys.i((..1, sot_index..sot_index + 1))?)?
                    .i(0)?
                    .i(0)?;
                no_speech_prob = softmax(&logits, 0)?
                    .i(self.tokens.no_speech as usize)?
                    .to_scalar::<f32>()? as f64;
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(suppress)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;
            if next_token == self.tokens.eot {
                break;
            }
            let prob = softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;
            sum_logprob += prob.ln();
            tokens.push(next_token);
            generated.push(next_token);
        }

        let avg_logprob = sum_logprob / generated.len().max(1) as f64;
        Ok(WindowResult {
            tokens: generated,
            avg_logprob,
            no_speech_prob,
        })
    }

    fn decode_text(&self, tokens: &[u32]) -> Result<String> {
        let text_tokens: Vec<u32> = tokens
            .iter()
            .copied()
            .filter(|&t| t < self.tokens.eot)
            .collect();
        let text = self
            .tokenizer
            .decode(&text_tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }

    fn split_segments(
        &self,
        tokens: &[u32],
        time_offset: f64,
        window_end: f64,
        first_id: usize,
    ) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut pending: Vec<u32> = Vec::new();
        let mut start = time_offset;

        for &token in tokens {
            if token > self.tokens.no_timestamps {
                let timestamp = time_offset
                    + (token - self.tokens.no_timestamps - 1) as f64 * TIMESTAMP_RESOLUTION;
                if !pending.is_empty() {
                    self.push_segment(&mut segments, &pending, start, timestamp, first_id)?;
                    pending.clear();
                }
                start = timestamp;
            } else if token < self.tokens.eot {
                pending.push(token);
            }
        }
        if !pending.is_empty() {
            self.push_segment(&mut segments, &pending, start, window_end.max(start), first_id)?;
        }
        Ok(segments)
    }

    fn push_segment(
        &self,
        segments: &mut Vec<Segment>,
        tokens: &[u32],
        start: f64,
        end: f64,
        first_id: usize,
    ) -> Result<()> {
        let text = self.decode_text(tokens)?;
        if !text.is_empty() {
            segments.push(Segment {
                id: first_id + segments.len(),
                start,
                end,
                text,
            });
        }
        Ok(())
    }
}

/// Additive logit mask: `-inf` for suppressed tokens, `0` elsewhere.
fn suppress_mask(config: &Config, extra: Option<u32>, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|i| {
            if config.suppress_tokens.contains(&i) || Some(i) == extra {
                f32::NEG_INFINITY
            } else {
                0f32
            }
        })
        .collect();
    Ok(Tensor::new(mask.as_slice(), device)?)
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Token '{}' not found in vocabulary", token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::LargeV2);
        assert_eq!("turbo".parse::<ModelSize>().unwrap(), ModelSize::LargeV3Turbo);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_repo_and_display() {
        assert_eq!(ModelSize::Base.repo_name(), "openai/whisper-base");
        assert_eq!(ModelSize::LargeV3.to_string(), "large-v3");
    }
}
