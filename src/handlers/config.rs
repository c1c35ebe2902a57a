use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "asr": {
            "model": config.asr.model,
            "model_path": config.asr.model_path,
            "device": config.asr.device,
            "default_language": config.asr.default_language
        },
        "streaming": config.streaming,
        "vad": config.vad,
        "braille": {
            "backend": config.braille.backend,
            "default_table": config.braille.default_table,
            "table_directories": config.braille.table_directories
        },
        "performance": config.performance
    })
}

/// `GET /api/config`
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

/// `PUT /api/config`: partial update of the `streaming` and `vad` sections.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;
    tracing::info!(streaming = ?current_config.streaming, vad = ?current_config.vad, "Configuration updated");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated; applies to new streaming sessions",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::loaded_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_config_exposes_streaming_section() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(loaded_state("")))
                .route("/api/config", web::get().to(get_config)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/config").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["config"]["streaming"]["chunk_duration"], 3.0);
        assert_eq!(body["config"]["vad"]["enabled"], false);
        assert_eq!(body["config"]["braille"]["backend"], "liblouis");
    }

    #[actix_web::test]
    async fn test_update_config_validates() {
        let state = web::Data::new(loaded_state(""));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/api/config")
            .set_json(json!({"streaming": {"chunk_duration": 2.0}}))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(state.get_config().streaming.chunk_duration, 2.0);

        let req = test::TestRequest::put()
            .uri("/api/config")
            .set_json(json!({"streaming": {"buffer_limit": 1.0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(state.get_config().streaming.buffer_limit, 30.0);
    }
}
