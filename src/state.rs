//! # Application State Management
//!
//! Shared state handed to every HTTP handler and websocket connection
//! through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same value
//! - **RwLock**: many readers or one writer; config reads vastly outnumber updates
//! - Locks are held only long enough to copy data out, never across an `.await`
//!
//! ### Trait objects for collaborators
//! The recognizer and translator are stored as `Arc<dyn Trait>`, so handlers
//! and streaming sessions never know which backend serves them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::braille::{BrailleTranslator, TableCatalog};
use crate::config::AppConfig;
use crate::transcription::SpeechRecognizer;

#[derive(Clone)]
pub struct AppState {
    /// Configuration, updatable at runtime through `PUT /api/config`.
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and session counters, updated by middleware and the websocket endpoint.
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn BrailleTranslator>,
    pub tables: Arc<TableCatalog>,

    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Open streaming connections.
    pub active_sessions: u32,
    /// Keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

// Poisoned locks are recovered, not propagated.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    pub fn new(
        config: AppConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        translator: Arc<dyn BrailleTranslator>,
        tables: TableCatalog,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            recognizer,
            translator,
            tables: Arc::new(tables),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released on return.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Replace the configuration if it validates.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *write(&self.config) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        write(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write(&self.metrics).error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a new streaming connection unless `limit` are already open.
    ///
    /// Returns false, without counting, when the server is full.
    pub fn try_open_session(&self, limit: usize) -> bool {
        let mut metrics = write(&self.metrics);
        if metrics.active_sessions as usize >= limit {
            return false;
        }
        metrics.active_sessions += 1;
        true
    }

    pub fn close_session(&self) {
        let mut metrics = write(&self.metrics);
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::braille::BuiltinTranslator;
    use crate::transcription::{
        AsrError, EngineStatus, SpeechRecognizer, TranscriptionOutput, TranscriptionRequest,
    };
    use async_trait::async_trait;

    /// Recognizer double that echoes a fixed text.
    pub struct FixedRecognizer {
        pub status: EngineStatus,
        pub text: String,
    }

    #[async_trait]
    impl SpeechRecognizer for FixedRecognizer {
        async fn status(&self) -> EngineStatus {
            self.status.clone()
        }

        async fn transcribe(&self, request: TranscriptionRequest) -> Result<TranscriptionOutput, AsrError> {
            if let Some(err) = self.status.unavailable_error() {
                return Err(err);
            }
            Ok(TranscriptionOutput {
                text: self.text.clone(),
                language: request.language.clone(),
                duration_seconds: request.duration_seconds(),
                segments: None,
                last_words_hint: None,
            })
        }
    }

    /// State backed by test doubles and the builtin braille translator.
    pub fn test_state(status: EngineStatus, text: &str) -> AppState {
        let mut config = AppConfig::default();
        config.braille.default_table = "en-us-g1.ctb".to_string();
        AppState::new(
            config,
            Arc::new(FixedRecognizer {
                status,
                text: text.to_string(),
            }),
            Arc::new(BuiltinTranslator::new()),
            TableCatalog::new(Vec::new()),
        )
    }

    pub fn loaded_state(text: &str) -> AppState {
        test_state(
            EngineStatus::Loaded {
                model: "whisper-test".to_string(),
                device: "cpu".to_string(),
            },
            text,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::loaded_state;
    use super::*;

    #[test]
    fn test_endpoint_metrics() {
        let state = loaded_state("");
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_session_limit() {
        let state = loaded_state("");
        assert!(state.try_open_session(2));
        assert!(state.try_open_session(2));
        assert!(!state.try_open_session(2));
        assert_eq!(state.get_metrics_snapshot().active_sessions, 2);

        state.close_session();
        state.close_session();
        state.close_session();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_invalid_config_update_is_rejected() {
        let state = loaded_state("");
        let mut config = state.get_config();
        config.streaming.sample_rate = 0;
        assert!(state.update_config(config).is_err());
        assert_eq!(state.get_config().streaming.sample_rate, 16000);
    }
}
