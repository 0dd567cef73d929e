// ABOUTME: Normalized stream events emitted by every coder adapter during a run.
// ABOUTME: Includes message/tool lifecycle, terminal events, error codes and usage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Events emitted by coder adapters during `run_streamed`.
///
/// A well-formed sequence starts with [`StreamEvent::Init`] and ends with exactly one
/// terminal event (see [`StreamEvent::is_terminal`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every run
    #[serde(rename_all = "camelCase")]
    Init {
        /// Backend identifier (e.g., "claude", "codex")
        provider: String,
        /// Thread id, absent only when the backend never reported one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },

    /// Backend event without semantic typing, passed through for observability
    Progress {
        /// Short classification (e.g., "reasoning", "unparsed")
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        /// Opaque backend payload
        raw: Value,
    },

    /// Assistant (or other role) text
    Message {
        role: String,
        text: String,
        /// True for incremental chunks, false for final content
        #[serde(default)]
        delta: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },

    /// Backend invoked a tool
    ToolUse {
        name: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },

    /// Tool produced a result
    ToolResult {
        name: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },

    /// Error reported by the backend or the adapter.
    ///
    /// Terminal unless `recoverable` is set.
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default)]
        recoverable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },

    /// Run ended because it was cancelled
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Run completed normally
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Done { .. } | StreamEvent::Cancelled { .. } => true,
            StreamEvent::Error { recoverable, .. } => !recoverable,
            _ => false,
        }
    }

    /// Short, stable name of the variant as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Init { .. } => "init",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Message { .. } => "message",
            StreamEvent::ToolUse { .. } => "tool_use",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Cancelled { .. } => "cancelled",
            StreamEvent::Done { .. } => "done",
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        StreamEvent::Message {
            role: "assistant".to_string(),
            text: text.into(),
            delta: false,
            raw: None,
        }
    }

    pub fn assistant_delta(text: impl Into<String>) -> Self {
        StreamEvent::Message {
            role: "assistant".to_string(),
            text: text.into(),
            delta: true,
            raw: None,
        }
    }

    pub fn progress(label: &str, raw: Value) -> Self {
        StreamEvent::Progress {
            label: Some(label.to_string()),
            raw,
        }
    }

    /// Terminal error event
    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            code,
            message: message.into(),
            recoverable: false,
            raw: None,
        }
    }

    pub fn done() -> Self {
        StreamEvent::Done { usage: None }
    }
}

/// Machine-readable error codes.
///
/// Serialized as plain strings. `interrupted` is reserved for cancellation-induced
/// termination; codes a backend reports that are not listed here pass through verbatim
/// as [`ErrorCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    Interrupted,
    NotFound,
    BackendUnavailable,
    BackendError,
    Timeout,
    RateLimited,
    AuthFailed,
    PermissionDenied,
    Configuration,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Interrupted => "interrupted",
            ErrorCode::NotFound => "not_found",
            ErrorCode::BackendUnavailable => "backend_unavailable",
            ErrorCode::BackendError => "backend_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::Configuration => "configuration",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "interrupted" => ErrorCode::Interrupted,
            "not_found" => ErrorCode::NotFound,
            "backend_unavailable" => ErrorCode::BackendUnavailable,
            "backend_error" => ErrorCode::BackendError,
            "timeout" => ErrorCode::Timeout,
            "rate_limited" => ErrorCode::RateLimited,
            "auth_failed" => ErrorCode::AuthFailed,
            "permission_denied" => ErrorCode::PermissionDenied,
            "configuration" => ErrorCode::Configuration,
            _ => ErrorCode::Other(code),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::from(code.to_string())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Other(code) => code,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage and cost tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Input tokens consumed
    pub input_tokens: u64,
    /// Output tokens generated
    pub output_tokens: u64,
    /// Tokens read from cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    /// Tokens written to cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    /// Total cost in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Backend-specific usage data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Result of a non-streaming run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub thread_id: Option<String>,
    /// Last assistant message, empty when the run produced none
    pub text: String,
    /// Structured output, present only when an output schema was supplied and matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
