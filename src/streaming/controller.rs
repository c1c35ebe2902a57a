//! # Streaming Session Controller
//!
//! Drives one streaming connection. Inbound frames arrive on a bounded
//! channel and are handled strictly one at a time: a frame is fully
//! processed, including any flush and its round-trip to the recognizer and
//! translator, before the next one is read. Events for the client go out on
//! an unbounded channel that the transport drains.
//!
//! ## Lifecycle:
//! 1. **Connect**: if the recognizer is not ready, one `error` event and a close
//! 2. **Ready**: `ready` with model and device, session starts `Idle`
//! 3. **Loop**: control messages and audio frames until the inbound side closes
//!
//! Dropping the inbound sender ends the loop. A flush already in flight
//! finishes and its events are discarded if the client is gone.

use actix_web::web::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatch::{TranscriptionDispatcher, TranslationAdapter};
use super::protocol::{ClientMessage, ServerEvent};
use super::session::{SessionConfig, StreamingSession};
use crate::audio::processor::decode_pcm_frame;
use crate::audio::segmentation::{FlushDecision, FlushReason, SegmentationPolicy};
use crate::audio::vad::VadStream;
use crate::braille::BrailleTranslator;
use crate::config::{AppConfig, VadConfig};
use crate::transcription::{EngineStatus, SpeechRecognizer};

/// Frames queued between the transport and the controller before the
/// transport stops reading.
pub const INBOUND_QUEUE_DEPTH: usize = 16;

/// A frame received from the client.
#[derive(Debug, Clone)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
}

/// Something the transport must do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Close,
}

/// Per-session settings derived from the server configuration when the
/// connection opens.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    pub policy: SegmentationPolicy,
    pub use_context_carryover: bool,
    pub vad: VadConfig,
    pub defaults: SessionConfig,
}

impl StreamingSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: config.streaming.policy(),
            use_context_carryover: config.streaming.use_context_carryover,
            vad: config.vad.clone(),
            defaults: SessionConfig::new(
                config.asr.default_language.clone(),
                config.braille.default_table.clone(),
            ),
        }
    }
}

pub struct SessionController {
    id: Uuid,
    session: StreamingSession,
    dispatcher: TranscriptionDispatcher,
    adapter: TranslationAdapter,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Serve one connection from handshake to close.
pub async fn serve_connection(
    id: Uuid,
    recognizer: Arc<dyn SpeechRecognizer>,
    translator: Arc<dyn BrailleTranslator>,
    settings: StreamingSettings,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    let (model, device) = match recognizer.status().await {
        EngineStatus::Loaded { model, device } => (model, device),
        status => {
            let reason = status
                .unavailable_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "ASR model not loaded".to_string());
            warn!(connection_id = %id, status = status.as_str(), "Rejecting streaming connection");
            let _ = outbound.send(Outbound::Event(ServerEvent::error(reason)));
            let _ = outbound.send(Outbound::Close);
            return;
        }
    };

    let _ = outbound.send(Outbound::Event(ServerEvent::Ready { model, device }));
    SessionController::new(id, recognizer, translator, settings, outbound)
        .run(inbound)
        .await;
}

impl SessionController {
    pub fn new(
        id: Uuid,
        recognizer: Arc<dyn SpeechRecognizer>,
        translator: Arc<dyn BrailleTranslator>,
        settings: StreamingSettings,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let vad = VadStream::from_config(&settings.vad, settings.policy.sample_rate);
        Self {
            id,
            session: StreamingSession::new(
                settings.policy,
                settings.defaults,
                settings.use_context_carryover,
                vad,
            ),
            dispatcher: TranscriptionDispatcher::new(recognizer, settings.policy.sample_rate),
            adapter: TranslationAdapter::new(translator),
            outbound,
        }
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    /// Read, handle, repeat, until the transport goes away.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        info!(connection_id = %self.id, "Streaming session opened");

        while let Some(frame) = inbound.recv().await {
            self.handle(frame).await;
            if self.outbound.is_closed() {
                break;
            }
        }

        info!(
            connection_id = %self.id,
            state = self.session.state().as_str(),
            buffered_seconds = self.session.buffered_duration(),
            "Streaming session closed"
        );
    }

    pub async fn handle(&mut self, frame: Inbound) {
        match frame {
            Inbound::Text(text) => self.handle_text(&text).await,
            Inbound::Binary(data) => self.handle_audio(&data).await,
        }
    }

    fn emit(&self, event: ServerEvent) {
        if self.outbound.send(Outbound::Event(event)).is_err() {
            debug!(connection_id = %self.id, "Client gone, dropping event");
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %self.id, error = %e, "Unparseable control message");
                self.emit(ServerEvent::error(format!("Invalid message: {}", e)));
                return;
            }
        };

        match message {
            ClientMessage::Config { config } => match self.session.merge_config(config) {
                Ok(merged) => {
                    let config = merged.clone();
                    debug!(connection_id = %self.id, ?config, "Session config updated");
                    self.emit(ServerEvent::ConfigUpdated { config });
                }
                Err(message) => self.emit(ServerEvent::error(message)),
            },
            ClientMessage::StartRecording => {
                self.session.start_recording();
                info!(connection_id = %self.id, "Recording started");
                self.emit(ServerEvent::RecordingStarted);
            }
            ClientMessage::StopRecording => self.stop_recording().await,
        }
    }

    async fn handle_audio(&mut self, data: &[u8]) {
        let samples = match decode_pcm_frame(data) {
            Ok(samples) => samples,
            Err(e) => {
                self.emit(ServerEvent::error(e.to_string()));
                return;
            }
        };
        if samples.is_empty() {
            return;
        }

        if self.session.begin_implicit_recording() {
            debug!(connection_id = %self.id, "Audio while idle, recording implicitly");
            self.emit(ServerEvent::SpeechStarted);
        }

        if let FlushDecision::Flush(reason) = self.session.append_frame(samples) {
            self.flush(reason).await;
        }
    }

    async fn stop_recording(&mut self) {
        if self.session.is_recording() {
            if self.session.meets_final_minimum() {
                self.flush(FlushReason::RecordingStopped).await;
            } else if self.session.buffered_duration() > 0.0 {
                debug!(
                    connection_id = %self.id,
                    buffered_seconds = self.session.buffered_duration(),
                    "Discarding remainder below minimum duration"
                );
            }
        }

        let config = self.session.config().clone();
        if let Some(summary) = self.session.finish_recording() {
            info!(connection_id = %self.id, chunks = summary.chunks, "Recording finished");
            self.emit(ServerEvent::FinalResult {
                transcribed_text: summary.text,
                braille: summary.braille,
                language: config.language,
                table_used: config.braille_table,
                chunks: summary.chunks,
            });
        }
        self.emit(ServerEvent::RecordingStopped);
    }

    /// Transcribe and translate the buffered span.
    async fn flush(&mut self, reason: FlushReason) {
        let Some(span) = self.session.take_span() else {
            debug!(
                connection_id = %self.id,
                buffered_seconds = self.session.buffered_duration(),
                "Span below dispatch floor, keeping frames"
            );
            return;
        };

        let duration = span.len() as f64 / self.session.policy().sample_rate as f64;
        self.emit(ServerEvent::Processing { duration });

        let config = self.session.config().clone();
        let prompt = self.session.priming_hint();
        let start_time = Instant::now();
        debug!(
            connection_id = %self.id,
            reason = reason.as_str(),
            duration_seconds = duration,
            primed = prompt.is_some(),
            "Dispatching chunk"
        );

        match self.dispatcher.dispatch(span, &config, prompt).await {
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Chunk transcription failed");
                self.emit(ServerEvent::error(e.to_string()));
            }
            Ok(output) if output.text.trim().is_empty() => {
                debug!(connection_id = %self.id, duration_seconds = duration, "No speech in chunk");
            }
            Ok(output) => {
                let text = output.text.trim().to_string();
                self.session.update_carryover(&text, output.last_words_hint.as_deref());

                match self.adapter.translate_chunk(&text, &config.braille_table).await {
                    Ok(braille) => {
                        self.session.accumulate(&text, &braille);
                        info!(
                            connection_id = %self.id,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            chars = text.len(),
                            "Chunk transcribed"
                        );
                        self.emit(ServerEvent::Result {
                            transcribed_text: text,
                            braille,
                            language: output.language,
                            table_used: config.braille_table.clone(),
                            audio_duration: output.duration_seconds,
                            segments: output.segments,
                            success: true,
                        });
                    }
                    Err(e) => {
                        warn!(connection_id = %self.id, error = %e, "Chunk braille translation failed");
                        self.emit(ServerEvent::error(e.to_string()));
                    }
                }
            }
        }

        self.session.finish_flush();
    }
}
