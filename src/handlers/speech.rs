//! Whole-file speech endpoints.
//!
//! Both routes take a multipart form with an audio file in the `audio` field
//! and run it through the shared recognizer in one call. Any container the
//! decoder recognizes is accepted; the upload's file suffix is the format hint.

use crate::audio::processor::decode_audio;
use crate::transcription::{Segment, Task, TranscriptionOutput, TranscriptionRequest};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct TranscribeQuery {
    pub language: Option<String>,
    #[serde(default)]
    pub task: Task,
    #[serde(default)]
    pub word_timestamps: bool,
    pub braille_table: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
    pub language: String,
    pub duration: f64,
    pub segments: Option<Vec<serde_json::Value>>,
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpeechToBrailleResponse {
    pub transcribed_text: String,
    pub braille: String,
    pub language: String,
    pub table_used: String,
    pub audio_duration: f64,
    pub segments: Option<Vec<serde_json::Value>>,
    pub success: bool,
}

/// The `audio` field of an upload.
struct AudioUpload {
    bytes: Vec<u8>,
    /// Lowercased file suffix, if the client sent a filename with one.
    extension: Option<String>,
}

fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Read the `audio` field, refusing anything over `limit` bytes.
async fn read_audio_field(mut payload: Multipart, limit: usize) -> AppResult<AudioUpload> {
    let mut audio_data: Option<AudioUpload> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let disposition = field.content_disposition();
        let is_audio = disposition
            .and_then(|cd| cd.get_name())
            .map(|name| name == "audio")
            .unwrap_or(false);
        let extension = disposition
            .and_then(|cd| cd.get_filename())
            .and_then(file_extension);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if !is_audio {
                continue;
            }
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::ValidationError(format!(
                    "File too large: more than {} bytes",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if is_audio {
            audio_data = Some(AudioUpload { bytes, extension });
        }
    }

    audio_data.ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))
}

fn segments_json(segments: Option<Vec<Segment>>) -> Option<Vec<serde_json::Value>> {
    segments.map(|segs| {
        segs.into_iter()
            .map(|s| serde_json::json!({"start": s.start, "end": s.end, "text": s.text}))
            .collect()
    })
}

/// Shared path of both endpoints: status check, upload, decode, transcribe.
async fn run_upload(
    state: &AppState,
    payload: Multipart,
    query: &TranscribeQuery,
) -> AppResult<TranscriptionOutput> {
    if let Some(err) = state.recognizer.status().await.unavailable_error() {
        return Err(err.into());
    }

    let config = state.get_config();
    let upload = read_audio_field(payload, config.performance.max_upload_bytes).await?;
    let size = upload.bytes.len();
    let decoded = decode_audio(upload.bytes, upload.extension.as_deref())
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    tracing::debug!(
        bytes = size,
        extension = upload.extension.as_deref().unwrap_or("-"),
        sample_rate = decoded.sample_rate,
        channels = decoded.channels,
        duration_s = decoded.duration_seconds(),
        "Decoded uploaded audio"
    );

    let sample_rate = config.streaming.sample_rate;
    let audio = decoded
        .into_mono(sample_rate)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    let language = query
        .language
        .clone()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(config.asr.default_language);

    let output = state
        .recognizer
        .transcribe(TranscriptionRequest {
            audio,
            sample_rate,
            language,
            task: query.task,
            want_timestamps: query.word_timestamps,
            initial_prompt: None,
        })
        .await?;

    Ok(output)
}

/// `POST /api/transcribe`
pub async fn transcribe(
    state: web::Data<AppState>,
    query: web::Query<TranscribeQuery>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let output = run_upload(&state, payload, &query).await?;
    tracing::info!(
        language = %output.language,
        duration_s = output.duration_seconds,
        "File transcribed"
    );

    Ok(HttpResponse::Ok().json(TranscribeResponse {
        text: output.text.trim().to_string(),
        language: output.language,
        duration: output.duration_seconds,
        segments: segments_json(output.segments),
        success: true,
    }))
}

/// `POST /api/speech-to-braille`
pub async fn speech_to_braille(
    state: web::Data<AppState>,
    query: web::Query<TranscribeQuery>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let output = run_upload(&state, payload, &query).await?;

    let table = query
        .braille_table
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.get_config().braille.default_table);
    let text = output.text.trim().to_string();
    let braille = if text.is_empty() {
        String::new()
    } else {
        state.translator.translate(&text, &table).await?
    };

    Ok(HttpResponse::Ok().json(SpeechToBrailleResponse {
        transcribed_text: text,
        braille,
        language: output.language,
        table_used: table,
        audio_duration: output.duration_seconds,
        segments: segments_json(output.segments),
        success: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{loaded_state, test_state};
    use crate::transcription::EngineStatus;
    use actix_web::{http::header, test, App};
    use std::io::Cursor;

    const BOUNDARY: &str = "----speechtestboundary";

    fn wav_file(seconds: f32, sample_rate: u32) -> Vec<u8> {
        wav_with_channels(seconds, sample_rate, 1)
    }

    fn wav_with_channels(seconds: f32, sample_rate: u32, channels: u16) -> Vec<u8> {
        let samples = vec![0i16; (seconds * sample_rate as f32) as usize * channels as usize];
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, channels, sample_rate, 16);
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut out).unwrap();
        out.into_inner()
    }

    fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
        multipart_file(field, "clip.wav", data)
    }

    fn multipart_file(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload(uri: &str, body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/api/transcribe", web::post().to(transcribe))
                    .route("/api/speech-to-braille", web::post().to(speech_to_braille)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_transcribe_upload() {
        let app = app!(loaded_state(" hello "));
        let req = upload("/api/transcribe?language=en", multipart_body("audio", &wav_file(1.0, 8000)))
            .to_request();
        let body: TranscribeResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.text, "hello");
        assert_eq!(body.language, "en");
        assert!((body.duration - 1.0).abs() < 0.01);
        assert!(body.success);
    }

    #[actix_web::test]
    async fn test_speech_to_braille_upload() {
        let app = app!(loaded_state("hello"));
        let req = upload("/api/speech-to-braille", multipart_body("audio", &wav_file(0.5, 16000)))
            .to_request();
        let body: SpeechToBrailleResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.transcribed_text, "hello");
        assert_eq!(body.braille, "⠓⠑⠇⠇⠕");
        assert_eq!(body.table_used, "en-us-g1.ctb");
    }

    #[actix_web::test]
    async fn test_missing_field_and_bad_audio_are_rejected() {
        let app = app!(loaded_state("hello"));
        let req = upload("/api/transcribe", multipart_body("file", &wav_file(0.5, 16000))).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = upload("/api/transcribe", multipart_body("audio", b"not a wav file")).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_upload_is_resampled_whatever_its_name() {
        let app = app!(loaded_state("hello"));
        let req = upload(
            "/api/transcribe",
            multipart_file("audio", "Recording.M4A", &wav_with_channels(1.0, 44100, 2)),
        )
        .to_request();
        let body: TranscribeResponse = test::call_and_read_body_json(&app, req).await;
        assert!((body.duration - 1.0).abs() < 0.01);

        let req = upload("/api/transcribe", multipart_file("audio", "notes.mp3", b"not audio at all"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_file_extension_is_lowercased() {
        assert_eq!(file_extension("Recording.M4A").as_deref(), Some("m4a"));
        assert_eq!(file_extension("archive.tar.ogg").as_deref(), Some("ogg"));
        assert_eq!(file_extension("noext"), None);
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let state = loaded_state("hello");
        let mut config = state.get_config();
        config.performance.max_upload_bytes = 1024;
        state.update_config(config).unwrap();

        let app = app!(state);
        let req = upload("/api/transcribe", multipart_body("audio", &wav_file(1.0, 16000))).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_engine_status_maps_to_http_status() {
        let app = app!(test_state(EngineStatus::Loading, "hello"));
        let req = upload("/api/transcribe", multipart_body("audio", &wav_file(0.5, 16000))).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 503);

        let app = app!(test_state(EngineStatus::Failed("no weights".to_string()), "hello"));
        let req = upload("/api/speech-to-braille", multipart_body("audio", &wav_file(0.5, 16000)))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 500);
    }
}
