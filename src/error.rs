//! Error types for orbnode
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("not found")]
    NotFound,

    /// Content not found in an anchor event (404)
    #[error("content not found")]
    ContentNotFound,

    /// Authentication required (401)
    #[error("authentication required")]
    Unauthorized,

    /// Malformed request parameter or IRI (400)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Validation error (400)
    #[error("validation error: {0}")]
    Validation(String),

    /// Hashlink is missing the `hl:` prefix or is otherwise unparsable (400)
    #[error("malformed hashlink [{0}]")]
    MalformedHashlink(String),

    /// A previous-anchor hashlink carries no `:` separator (400)
    #[error("invalid previous anchor hashlink [{0}] - must contain separator ':'")]
    InvalidPreviousAnchor(String),

    /// A resource's previous anchor is not in the event's parent list (400)
    #[error("resource [{0}] not found in previous anchor list")]
    ResourceNotInParent(String),

    /// A resource ID does not start with the generator's namespace prefix (400)
    #[error("resource ID [{0}] does not start with {1}")]
    MissingResourcePrefix(String, String),

    /// Service is not in the Started state (503)
    #[error("service has not started")]
    NotStarted,

    /// JSON (de)serialization error (500)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Activity store error (500)
    #[error("store error: {0}")]
    Store(String),

    /// Internal server error (500)
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Configuration error (500)
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// True when the error is the normal end-of-iterator / missing-entity signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound | AppError::ContentNotFound)
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body. Internal detail is logged, never leaked.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type, should_log_detail) = match &self {
            AppError::NotFound | AppError::ContentNotFound => {
                (StatusCode::NOT_FOUND, self.to_string(), "not_found", false)
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "unauthorized",
                false,
            ),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "bad_request", false)
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone(), "validation", false)
            }
            AppError::MalformedHashlink(_)
            | AppError::InvalidPreviousAnchor(_)
            | AppError::ResourceNotInParent(_)
            | AppError::MissingResourcePrefix(..) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                "validation",
                false,
            ),
            AppError::NotStarted => (
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                "not_started",
                false,
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Serialization error".to_string(),
                "serialization",
                true,
            ),
            AppError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Store error".to_string(),
                "store",
                true,
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                "config",
                true,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
                true,
            ),
        };

        if should_log_detail {
            tracing::error!(error = %self, %error_type, "Request failed with internal details");
        }

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn store_errors_are_sanitized() {
        let response =
            AppError::Store("connection refused at internal-host:5432".to_string()).into_response();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let body_text = String::from_utf8(body.to_vec()).expect("utf8 body");
        assert!(body_text.contains("Store error"));
        assert!(!body_text.contains("internal-host"));
    }

    #[tokio::test]
    async fn validation_errors_keep_message() {
        let response = AppError::Validation("no actor specified".to_string()).into_response();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let body_text = String::from_utf8(body.to_vec()).expect("utf8 body");
        assert!(body_text.contains("no actor specified"));
    }

    #[test]
    fn not_found_kinds() {
        assert!(AppError::NotFound.is_not_found());
        assert!(AppError::ContentNotFound.is_not_found());
        assert!(!AppError::Unauthorized.is_not_found());
    }
}
