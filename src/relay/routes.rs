// ABOUTME: HTTP handlers for agent discovery, session lifecycle and message delivery
// ABOUTME: Streams NDJSON for ?stream=true, otherwise returns the run result as JSON
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use coder_agent::{CoderError, PromptInput, RunOpts, StartOpts};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::ndjson::ndjson_response;
use super::RelayState;
use crate::metrics;

/// Largest accepted prompt, in bytes
const MAX_PROMPT_LENGTH: usize = 256 * 1024;

pub fn api_router() -> Router<Arc<RelayState>> {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", delete(delete_session))
        .route("/sessions/{session_id}/interrupt", post(interrupt_session))
        .route("/messages", post(post_message))
}

/// JSON error body: `{"error": {"code": ..., "message": ...}}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    fn session_not_found(session_id: &str) -> Self {
        metrics::record_request_error("session_not_found");
        Self::new(
            StatusCode::NOT_FOUND,
            "session_not_found",
            format!("Session not found: {}", session_id),
        )
    }
}

impl From<CoderError> for ApiError {
    fn from(err: CoderError) -> Self {
        let status = match &err {
            e if e.is_configuration() => StatusCode::BAD_REQUEST,
            CoderError::Interrupted(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.code().to_string(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"error": {"code": self.code, "message": self.message}});
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentInfo>,
}

async fn list_agents(State(state): State<Arc<RelayState>>) -> Json<AgentsResponse> {
    let agents = state
        .registry
        .names()
        .into_iter()
        .map(|id| AgentInfo { id })
        .collect();
    Json(AgentsResponse { agents })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub provider: String,
    #[serde(default)]
    pub options: Option<StartOpts>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

async fn create_session(
    State(state): State<Arc<RelayState>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let session = state
        .sessions
        .create(
            &state.registry,
            &payload.provider,
            payload.options.unwrap_or_default(),
        )
        .await
        .map_err(|e| {
            tracing::warn!(provider = %payload.provider, error = %e, "Session creation failed");
            metrics::record_request_error("session_create");
            ApiError::from(e)
        })?;

    Ok(Json(CreateSessionResponse {
        session_id: session.id,
        thread_id: session.thread.id().map(str::to_string),
    }))
}

async fn delete_session(
    State(state): State<Arc<RelayState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state
        .sessions
        .evict(&session_id)
        .ok_or_else(|| ApiError::session_not_found(&session_id))?;
    if let Err(e) = session.coder.close(&session.thread).await {
        tracing::warn!(session_id = %session_id, error = %e, "Failed to close thread");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InterruptRequest {
    pub reason: Option<String>,
}

async fn interrupt_session(
    State(state): State<Arc<RelayState>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| ApiError::session_not_found(&session_id))?;
    // Body is optional; anything unparseable falls back to the default reason
    let reason = serde_json::from_slice::<InterruptRequest>(&body)
        .ok()
        .and_then(|p| p.reason)
        .unwrap_or_else(|| "interrupted by client".to_string());
    tracing::info!(session_id = %session_id, reason = %reason, "Interrupt requested");
    session.coder.interrupt(&session.thread, &reason);
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub session_id: String,
    pub content: PromptInput,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub stream_partial_messages: bool,
}

async fn post_message(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<MessageQuery>,
    Json(payload): Json<MessageRequest>,
) -> Result<Response, ApiError> {
    let session = state
        .sessions
        .get(&payload.session_id)
        .ok_or_else(|| ApiError::session_not_found(&payload.session_id))?;

    let prompt = payload.content.to_prompt();
    if prompt.trim().is_empty() {
        metrics::record_request_error("empty_prompt");
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "Message content cannot be empty",
        ));
    }
    if prompt.len() > MAX_PROMPT_LENGTH {
        metrics::record_request_error("prompt_too_large");
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("Message too large (max {} bytes)", MAX_PROMPT_LENGTH),
        ));
    }

    let mut run_opts = RunOpts::default();
    if let Some(schema) = payload.output_schema {
        run_opts = run_opts.with_output_schema(schema);
    }
    if payload.stream_partial_messages {
        run_opts = run_opts.with_partial_messages();
    }

    let streamed = query.stream.unwrap_or(false);
    metrics::record_run_started(&session.provider, streamed);
    tracing::info!(
        session_id = %session.id,
        provider = %session.provider,
        streamed,
        prompt_len = prompt.len(),
        "Message received"
    );

    if streamed {
        let stream = session
            .coder
            .run_streamed(&session.thread, payload.content, run_opts);
        return Ok(ndjson_response(session.provider.clone(), session.id.clone(), stream));
    }

    match session.coder.run(&session.thread, payload.content, run_opts).await {
        Ok(result) => {
            metrics::record_run_finished(&session.provider, "done");
            Ok(Json(result).into_response())
        }
        Err(e) => {
            let terminal = if matches!(e, CoderError::Interrupted(_)) {
                "cancelled"
            } else {
                "error"
            };
            metrics::record_run_finished(&session.provider, terminal);
            tracing::warn!(session_id = %session.id, error = %e, "Run failed");
            Err(ApiError::from(e))
        }
    }
}

pub async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
