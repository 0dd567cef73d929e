// ABOUTME: Bearer-token middleware for the relay's /api/acp routes
// ABOUTME: Passes everything through when no token is configured
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::routes::ApiError;
use super::RelayState;
use crate::metrics;

pub async fn bearer_auth(
    State(state): State<Arc<RelayState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Relay authentication failed");
            metrics::record_request_error("auth_failed");
            ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid or missing bearer token")
                .into_response()
        }
    }
}
