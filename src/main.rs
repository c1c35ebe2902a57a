//! # Speech-to-Braille Server - Main Application Entry Point
//!
//! Sets up an Actix-web server that turns speech into braille, either one
//! uploaded file at a time or as a live websocket stream.
//!
//! ## Application Architecture:
//! - **config**: application configuration (config file + environment variables)
//! - **state**: shared application state, collaborators and metrics
//! - **audio**: frame decoding, buffering, segmentation and voice activity
//! - **transcription**: the Whisper speech recognizer
//! - **braille**: braille translation backends and the table catalog
//! - **streaming**: per-connection streaming session controller
//! - **websocket**: the websocket transport for streaming sessions
//! - **health**, **handlers**, **middleware**, **error**: the HTTP surface

mod audio;
mod braille;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod streaming;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use braille::{translator_from_config, TableCatalog};
use crate::config::{AppConfig, CorsConfig};
use state::AppState;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ModelSize, ModelSource, WhisperEngine};

/// Set once a termination signal arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speech2braille-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let source = match &config.asr.model_path {
        Some(path) => ModelSource::Directory(PathBuf::from(path)),
        None => ModelSource::Hub(config.asr.model.parse::<ModelSize>()?),
    };
    let device = device::device_from_config(&config.asr.device);
    let engine = Arc::new(WhisperEngine::new(source, device));

    // Requests that need the model get 503 until this finishes.
    let loader = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = loader.load().await {
            error!("Speech recognition model unavailable: {}", e);
        }
    });

    let translator = translator_from_config(&config.braille);
    match translator.version().await {
        Ok(version) => info!("Braille backend: {}", version),
        Err(e) => warn!("Braille backend not available: {}", e),
    }
    let tables = TableCatalog::from_config(&config.braille);

    let app_state = AppState::new(config.clone(), engine, translator, tables);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let cors_config = config.cors.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(build_cors(&cors_config))
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::health_check))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .service(
                web::scope("/api")
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/tables", web::get().to(handlers::list_tables))
                    .route("/translate", web::post().to(handlers::translate))
                    .route("/back-translate", web::post().to(handlers::back_translate))
                    .route("/test-translation", web::get().to(handlers::test_translation))
                    .route("/transcribe", web::post().to(handlers::transcribe))
                    .route("/speech-to-braille", web::post().to(handlers::speech_to_braille)),
            )
            .route(
                "/ws/speech-to-braille",
                web::get().to(websocket::speech_to_braille_ws),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured console logging; `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech2braille_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn build_cors(config: &CorsConfig) -> Cors {
    let mut cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(config.max_age);

    if config.allow_origins.iter().any(|o| o == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in &config.allow_origins {
            cors = cors.allowed_origin(origin);
        }
    }
    cors
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
#[cfg(unix)]
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

#[cfg(not(unix))]
fn setup_signal_handlers() {
    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                return;
            }
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
