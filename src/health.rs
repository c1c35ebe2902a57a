use crate::config::BrailleBackend;
use crate::state::AppState;
use crate::transcription::EngineStatus;
use actix_web::{web, HttpResponse};
use serde_json::json;
#[cfg(target_os = "linux")]
use std::process;

/// `GET /` and `GET /health`.
///
/// Always 200; a loading or failed model shows up in `asr_status`.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let asr_status = state.recognizer.status().await;

    let braille_version = match state.translator.version().await {
        Ok(version) => version,
        Err(e) => {
            tracing::warn!(error = %e, "Braille backend version unavailable");
            "unavailable".to_string()
        }
    };

    let (asr_model, asr_device) = match &asr_status {
        EngineStatus::Loaded { model, device } => (Some(model.clone()), Some(device.clone())),
        _ => (Some(format!("whisper-{}", config.asr.model)), None),
    };

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "message": "Speech-to-braille server is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "braille_backend": match config.braille.backend {
            BrailleBackend::Liblouis => "liblouis",
            BrailleBackend::Builtin => "builtin",
        },
        "braille_version": braille_version,
        "asr_status": asr_status.as_str(),
        "asr_ready": asr_status.is_ready(),
        "asr_model": asr_model,
        "asr_device": asr_device,
        "asr_error": match &asr_status {
            EngineStatus::Failed(reason) => Some(reason.clone()),
            _ => None,
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_sessions": metrics.active_sessions
        },
        "memory": get_memory_info(),
    }))
}

/// `GET /metrics`: per-endpoint request statistics.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let max_sessions = state.get_config().performance.max_concurrent_sessions;

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let session_usage = if max_sessions > 0 {
        metrics.active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "active_sessions": metrics.active_sessions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "sessions": {
            "max_concurrent_sessions": max_sessions,
            "usage_percent": (session_usage * 100.0).round(),
        },
        "memory": get_memory_info(),
    }))
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) else {
        return memory_unavailable();
    };
    let field = |name: &str| {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };
    json!({
        "resident_memory_bytes": field("VmRSS:"),
        "virtual_memory_bytes": field("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    memory_unavailable()
}

fn memory_unavailable() -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}
