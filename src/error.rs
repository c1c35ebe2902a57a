//! # Error Handling
//!
//! HTTP-facing error type and its conversion into JSON responses.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Enums for error types**: each variant maps to one HTTP status
//! - **From trait**: lets `?` turn collaborator errors into `AppError`
//! - **ResponseError trait**: actix-web renders the error as a response
//!
//! Collaborator errors (`AsrError`, `BrailleError`) are defined next to the
//! collaborators with `thiserror`; this module only decides how they look to
//! HTTP clients.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::braille::BrailleError;
use crate::transcription::AsrError;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest**: client sent invalid data (400)
/// - **NotFound**: requested resource doesn't exist (404)
/// - **ConfigError**: configuration problems (500)
/// - **ValidationError**: data validation failed (400)
/// - **ServiceUnavailable**: a collaborator is still starting (503)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// All errors render as:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "ASR model is still loading",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are client mistakes, so they become 400s.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// A model that is not loaded yet is a 503, a model that failed to load or
/// crashed mid-inference is a 500, a request it cannot honour is a 400.
impl From<AsrError> for AppError {
    fn from(err: AsrError) -> Self {
        match err {
            AsrError::NotLoaded | AsrError::Loading => AppError::ServiceUnavailable(err.to_string()),
            AsrError::InvalidRequest(_) => AppError::BadRequest(err.to_string()),
            AsrError::LoadFailed(_) | AsrError::Inference(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<BrailleError> for AppError {
    fn from(err: BrailleError) -> Self {
        match err {
            BrailleError::Unavailable(_) => AppError::ServiceUnavailable(err.to_string()),
            BrailleError::UnknownTable(_) | BrailleError::Translation(_) => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ServiceUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::ConfigError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_asr_errors_map_to_http() {
        assert!(matches!(AppError::from(AsrError::Loading), AppError::ServiceUnavailable(_)));
        assert!(matches!(
            AppError::from(AsrError::InvalidRequest("bad language".into())),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            AppError::from(AsrError::Inference("nan".into())),
            AppError::Internal(_)
        ));
    }

    #[test]
    fn test_braille_errors_map_to_http() {
        assert!(matches!(
            AppError::from(BrailleError::UnknownTable("xx.ctb".into())),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            AppError::from(BrailleError::Unavailable("missing binary".into())),
            AppError::ServiceUnavailable(_)
        ));
    }
}
