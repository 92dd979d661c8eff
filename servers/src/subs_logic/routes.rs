//! # HTTP Surface
//!
//! ```text
//! OPTIONS *             204, CORS headers only
//! POST    /subscribe    {"email": "..."} -> {"message": "..."}
//! POST    /unsubscribe  {"email": "..."} -> {"message": "..."}
//! GET     /subscribers  -> {"subscribers": [{"email", "status"}, ...]}
//! ```
//!
//! Anything else, including a known path with the wrong method, is a 404.
//! Every response carries the CORS headers.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_common::registry::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::debug;

use super::error::AppError;
use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct EmailRequest {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubscriberView<'a> {
    email: &'a str,
    status: SubscriptionStatus,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origin);
    Router::new()
        .route("/subscribe", post(subscribe_handler))
        .route("/unsubscribe", post(unsubscribe_handler))
        .route("/subscribers", get(list_handler))
        .method_not_allowed_fallback(not_found)
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        // CorsLayer only lists methods and headers on preflights.
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,POST,OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type"),
        ))
        .layer(middleware::from_fn(options_no_content))
}

fn cors_layer(origin: &HeaderValue) -> CorsLayer {
    let allow_origin = if origin.as_bytes() == b"*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::exact(origin.clone())
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .vary([header::ORIGIN])
}

/// Every OPTIONS request ends as an empty 204, preflight or not.
async fn options_no_content(req: Request, next: Next) -> Response {
    if req.method() != Method::OPTIONS {
        return next.run(req).await;
    }
    let mut response = next.run(req).await;
    *response.status_mut() = StatusCode::NO_CONTENT;
    *response.body_mut() = Body::empty();
    response.headers_mut().remove(header::CONTENT_TYPE);
    response.headers_mut().remove(header::CONTENT_LENGTH);
    response
}

async fn not_found() -> AppError {
    AppError::NotFound
}

/// An empty body or a missing `email` field reads as an empty email, which
/// validation then rejects.
fn email_from_body(body: &Bytes) -> Result<String, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(String::new());
    }
    let request: Option<EmailRequest> =
        serde_json::from_slice(body).map_err(|e| AppError::BadBody(e.to_string()))?;
    Ok(request.and_then(|r| r.email).unwrap_or_default())
}

async fn subscribe_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let email = email_from_body(&body)?;
    debug!(email = %email, "subscribe request");
    let outcome = state.service.subscribe(&email).await?;
    Ok(Json(json!({ "message": outcome.to_string() })))
}

async fn unsubscribe_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let email = email_from_body(&body)?;
    debug!(email = %email, "unsubscribe request");
    let outcome = state.service.unsubscribe(&email).await?;
    Ok(Json(json!({ "message": outcome.to_string() })))
}

async fn list_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let records = state.service.list().await?;
    let subscribers: Vec<SubscriberView<'_>> = records
        .iter()
        .map(|r| SubscriberView {
            email: r.email.as_str(),
            status: r.status,
        })
        .collect();
    Ok(Json(json!({ "subscribers": subscribers })))
}
