use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_common::registry::RegistryError;
use serde_json::json;
use tracing::{error, warn};

/// # Application Error
///
/// Everything a handler can fail with, mapped onto a status code and a JSON
/// `{"error": ...}` body.
#[derive(Debug)]
pub enum AppError {
    /// Failure reported by the registry service.
    Registry(RegistryError),
    /// The request body is not JSON.
    BadBody(String),
    /// No route for this method and path.
    NotFound,
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::Registry(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Registry(RegistryError::InvalidInput(e)) => {
                warn!("rejected input: {}", e);
                (StatusCode::BAD_REQUEST, json!({ "error": "Invalid email" }))
            }
            AppError::Registry(RegistryError::CapacityExceeded { max }) => (
                StatusCode::CONFLICT,
                json!({ "error": format!("Subscriber limit of {} reached", max) }),
            ),
            AppError::Registry(RegistryError::Unavailable(e)) => {
                error!("backing store failure: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Unexpected error", "detail": format!("{:#}", e) }),
                )
            }
            AppError::BadBody(detail) => {
                warn!("unreadable request body: {}", detail);
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "Invalid JSON body", "detail": detail }),
                )
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "not found" })),
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Registry(e) => write!(f, "{}", e),
            AppError::BadBody(s) => write!(f, "Bad request body: {}", s),
            AppError::NotFound => write!(f, "Not found"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Registry(e) => Some(e),
            AppError::BadBody(_) | AppError::NotFound => None,
        }
    }
}
