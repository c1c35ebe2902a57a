use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

const SAMPLE_SENTENCE: &str = "Hello, world! This is a test of the braille translation system.";

#[derive(Debug, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    /// Falls back to the configured default table.
    pub table: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub original_text: String,
    pub braille: String,
    pub table_used: String,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct BackTranslationRequest {
    pub braille: String,
    pub table: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackTranslationResponse {
    pub original_braille: String,
    pub text: String,
    pub table_used: String,
    pub success: bool,
}

fn resolve_table(state: &AppState, table: Option<String>) -> String {
    table
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.get_config().braille.default_table)
}

/// `POST /api/translate`
pub async fn translate(
    state: web::Data<AppState>,
    body: web::Json<TranslationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.text.is_empty() {
        return Err(AppError::ValidationError("text must not be empty".to_string()));
    }
    let table = resolve_table(&state, body.table);
    let braille = state.translator.translate(&body.text, &table).await?;

    Ok(HttpResponse::Ok().json(TranslationResponse {
        original_text: body.text,
        braille,
        table_used: table,
        success: true,
    }))
}

/// `POST /api/back-translate`
pub async fn back_translate(
    state: web::Data<AppState>,
    body: web::Json<BackTranslationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    if body.braille.is_empty() {
        return Err(AppError::ValidationError("braille must not be empty".to_string()));
    }
    let table = resolve_table(&state, body.table);
    let text = state.translator.back_translate(&body.braille, &table).await?;

    Ok(HttpResponse::Ok().json(BackTranslationResponse {
        original_braille: body.braille,
        text,
        table_used: table,
        success: true,
    }))
}

/// `GET /api/test-translation`: a fixed sentence through the default table.
pub async fn test_translation(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let table = state.get_config().braille.default_table;
    let braille = state
        .translator
        .translate(SAMPLE_SENTENCE, &table)
        .await
        .map_err(|e| {
            AppError::Internal(format!(
                "Test translation failed: {}. Is the braille backend installed with tables?",
                e
            ))
        })?;

    Ok(HttpResponse::Ok().json(TranslationResponse {
        original_text: SAMPLE_SENTENCE.to_string(),
        braille,
        table_used: table,
        success: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::loaded_state;
    use actix_web::{test, App};
    use serde_json::json;

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/api/translate", web::post().to(translate))
                    .route("/api/back-translate", web::post().to(back_translate))
                    .route("/api/test-translation", web::get().to(test_translation)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_translate_with_default_table() {
        let app = app!(loaded_state(""));
        let req = test::TestRequest::post()
            .uri("/api/translate")
            .set_json(json!({"text": "hello"}))
            .to_request();
        let body: TranslationResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.braille, "⠓⠑⠇⠇⠕");
        assert_eq!(body.table_used, "en-us-g1.ctb");
        assert!(body.success);
    }

    #[actix_web::test]
    async fn test_translate_rejects_empty_text_and_unknown_table() {
        let app = app!(loaded_state(""));
        let req = test::TestRequest::post()
            .uri("/api/translate")
            .set_json(json!({"text": "", "table": "builtin"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri("/api/translate")
            .set_json(json!({"text": "hello", "table": "xx-g2.ctb"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_back_translate() {
        let app = app!(loaded_state(""));
        let req = test::TestRequest::post()
            .uri("/api/back-translate")
            .set_json(json!({"braille": "⠠⠓⠊", "table": "builtin"}))
            .to_request();
        let body: BackTranslationResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.text, "Hi");
        assert_eq!(body.original_braille, "⠠⠓⠊");
    }

    #[actix_web::test]
    async fn test_sample_translation_failure_is_a_server_error() {
        let state = loaded_state("");
        let mut config = state.get_config();
        config.braille.default_table = "xx-g2.ctb".to_string();
        state.update_config(config).unwrap();

        let app = app!(state);
        let req = test::TestRequest::get().uri("/api/test-translation").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 500);
    }
}
