// ABOUTME: NDJSON framing for streamed runs: one StreamEvent JSON object per line
// ABOUTME: The response body owns the event stream, so a client disconnect cancels the run
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use coder_agent::{EventStream, StreamEvent};
use futures_util::StreamExt;
use std::convert::Infallible;

use crate::metrics;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Serialize one event as a newline-terminated JSON line
pub fn frame(event: &StreamEvent) -> Bytes {
    match serde_json::to_vec(event) {
        Ok(mut line) => {
            line.push(b'\n');
            Bytes::from(line)
        }
        Err(e) => {
            // Unreachable for StreamEvent; keep the stream alive with a progress line
            tracing::error!(error = %e, kind = event.kind(), "Failed to serialize event");
            Bytes::from_static(b"{\"type\":\"progress\",\"label\":\"serialization_error\",\"raw\":null}\n")
        }
    }
}

/// Chunked NDJSON response streaming every event of one run
pub fn ndjson_response(provider: String, session_id: String, stream: EventStream) -> Response {
    let frames = stream.map(move |event| {
        if event.is_terminal() {
            metrics::record_run_finished(&provider, event.kind());
            tracing::info!(
                session_id = %session_id,
                provider = %provider,
                terminal = event.kind(),
                "Streamed run finished"
            );
        }
        Ok::<_, Infallible>(frame(&event))
    });

    let mut response = (StatusCode::OK, Body::from_stream(frames)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_single_line() {
        let bytes = frame(&StreamEvent::assistant_text("multi\nline"));
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["text"], "multi\nline");
    }
}
