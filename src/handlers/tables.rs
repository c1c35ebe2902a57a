use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};

/// `GET /api/tables`: installed braille tables, sorted by display name.
pub async fn list_tables(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let catalog = state.tables.clone();
    let tables = web::block(move || catalog.list())
        .await
        .map_err(|e| AppError::Internal(format!("table scan failed: {}", e)))?;

    tracing::debug!(count = tables.len(), "Listed braille tables");
    Ok(HttpResponse::Ok().json(tables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::braille::{BuiltinTranslator, TableCatalog};
    use crate::config::AppConfig;
    use crate::state::test_support::FixedRecognizer;
    use crate::transcription::EngineStatus;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_list_tables_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("en-us-g2.ctb"), "#-display-name: English US Grade 2\n").unwrap();
        std::fs::write(dir.path().join("es-g1.ctb"), "").unwrap();

        let state = AppState::new(
            AppConfig::default(),
            Arc::new(FixedRecognizer {
                status: EngineStatus::NotLoaded,
                text: String::new(),
            }),
            Arc::new(BuiltinTranslator::new()),
            TableCatalog::new(vec![dir.path().to_path_buf()]),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/tables", web::get().to(list_tables)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/tables").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let tables = body.as_array().unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0]["display_name"], "English US Grade 2");
        assert_eq!(tables[1]["display_name"], "Spanish Grade 1");
        assert_eq!(tables[1]["grade"], "g1");
    }
}
