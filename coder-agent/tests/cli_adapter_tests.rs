// ABOUTME: Tests for the Claude, Codex and Gemini adapters against fake CLIs.
// ABOUTME: Fake CLIs are shell scripts that print canned JSONL, fail, or sleep until killed.
#![cfg(unix)]

use coder_agent::backends::claude::{ClaudeAdapter, ClaudeConfig};
use coder_agent::backends::codex::{CodexAdapter, CodexConfig};
use coder_agent::backends::gemini::{GeminiAdapter, GeminiConfig};
use coder_agent::testing::{assert_well_formed, collect_events_with_timeout};
use coder_agent::{CoderAdapter, CoderError, ErrorCode, RunOpts, StartOpts, StreamEvent};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Write a fake CLI script and return its path
fn script(dir: &TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

fn claude(dir: &TempDir, body: &str) -> ClaudeAdapter {
    let config = ClaudeConfig {
        binary: "sh".to_string(),
        extra_args: vec![script(dir, "claude.sh", body)],
        cancel_grace_ms: 500,
        ..Default::default()
    };
    ClaudeAdapter::new(config, StartOpts::default())
}

fn codex(dir: &TempDir, body: &str) -> CodexAdapter {
    let config = CodexConfig {
        binary: "sh".to_string(),
        extra_args: vec![script(dir, "codex.sh", body)],
        cancel_grace_ms: 500,
        ..Default::default()
    };
    CodexAdapter::new(config, StartOpts::default())
}

fn gemini(dir: &TempDir, body: &str) -> GeminiAdapter {
    let config = GeminiConfig {
        binary: "sh".to_string(),
        extra_args: vec![script(dir, "gemini.sh", body)],
        cancel_grace_ms: 500,
    };
    GeminiAdapter::new(config, StartOpts::default())
}

/// Echoes the session flag it was given in the result text
const CLAUDE_SCRIPT: &str = r#"
mode="none"; sid=""
while [ $# -gt 0 ]; do
  case "$1" in
    --session-id) mode="new"; sid="$2"; shift ;;
    --resume) mode="resume"; sid="$2"; shift ;;
  esac
  shift
done
printf '{"type":"system","subtype":"init","session_id":"%s"}\n' "$sid"
printf 'not json at all\n'
printf '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{"path":"a"}}]}}\n'
printf '{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}\n'
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"%s %s"}]}}\n' "$mode" "$sid"
printf '{"type":"result","subtype":"success","result":"ignored","usage":{"input_tokens":7,"output_tokens":3}}\n'
"#;

#[tokio::test]
async fn test_claude_stream_is_well_formed() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(&dir, CLAUDE_SCRIPT);
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let id = thread.id().unwrap().to_string();

    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "hello".into(), RunOpts::default()),
        TIMEOUT,
    )
    .await;

    assert!(matches!(&events[0], StreamEvent::Init { thread_id: Some(t), .. } if *t == id));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Progress { label: Some(l), .. } if l == "unparsed")));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ToolResult { name, .. } if name == "Read")));
    match assert_well_formed(&events) {
        StreamEvent::Done { usage: Some(usage) } => assert_eq!(usage.input_tokens, 7),
        other => panic!("Expected Done with usage, got {:?}", other),
    }
}

#[tokio::test]
async fn test_claude_second_run_resumes_session() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(&dir, CLAUDE_SCRIPT);
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let id = thread.id().unwrap().to_string();

    let first = adapter.run(&thread, "one".into(), RunOpts::default()).await.unwrap();
    assert_eq!(first.text, format!("new {}", id));

    let second = adapter.run(&thread, "two".into(), RunOpts::default()).await.unwrap();
    assert_eq!(second.text, format!("resume {}", id));
    assert_eq!(second.thread_id, Some(id));
}

#[tokio::test]
async fn test_claude_resume_thread_keeps_id() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(&dir, CLAUDE_SCRIPT);
    let thread = adapter
        .resume_thread("0b9c5a7e-1111-4000-8000-000000000000", StartOpts::default())
        .await
        .unwrap();

    let result = adapter.run(&thread, "continue".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "resume 0b9c5a7e-1111-4000-8000-000000000000");
    assert_eq!(
        result.thread_id.as_deref(),
        Some("0b9c5a7e-1111-4000-8000-000000000000")
    );
}

#[tokio::test]
async fn test_claude_missing_conversation_is_not_found() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(
        &dir,
        "echo 'No conversation found with session ID: abc' >&2\nexit 1\n",
    );
    let thread = adapter.resume_thread("abc", StartOpts::default()).await.unwrap();

    let err = adapter.run(&thread, "hi".into(), RunOpts::default()).await.unwrap_err();
    assert!(matches!(err, CoderError::NotFound(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_claude_interrupt_kills_process() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(
        &dir,
        "printf '{\"type\":\"system\",\"subtype\":\"init\"}\\n'\nexec sleep 30\n",
    );
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let mut stream = adapter.run_streamed(&thread, "long task".into(), RunOpts::default());

    assert!(matches!(stream.recv().await, Some(StreamEvent::Init { .. })));
    assert!(matches!(stream.recv().await, Some(StreamEvent::Progress { .. })));

    let started = Instant::now();
    thread.interrupt("user abort");
    let rest = collect_events_with_timeout(stream, TIMEOUT).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(rest.last(), Some(StreamEvent::Cancelled { reason: Some(r) }) if r == "user abort"));
    assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_claude_result_error_rejects_run() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(
        &dir,
        "printf '{\"type\":\"result\",\"subtype\":\"error_during_execution\",\"is_error\":true,\"result\":\"Rate limit reached\"}\\n'\n",
    );
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let err = adapter.run(&thread, "x".into(), RunOpts::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimited);
}

#[tokio::test]
async fn test_missing_binary_is_backend_unavailable() {
    let config = ClaudeConfig {
        binary: "/nonexistent/claude-binary".to_string(),
        ..Default::default()
    };
    let adapter = ClaudeAdapter::new(config, StartOpts::default());
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();

    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "x".into(), RunOpts::default()),
        TIMEOUT,
    )
    .await;
    assert!(matches!(
        assert_well_formed(&events),
        StreamEvent::Error { code: ErrorCode::BackendUnavailable, .. }
    ));

    let err = adapter.run(&thread, "x".into(), RunOpts::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BackendUnavailable);
}

#[tokio::test]
async fn test_nonzero_exit_is_backend_error() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(&dir, "echo 'something broke' >&2\nexit 3\n");
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();

    let err = adapter.run(&thread, "x".into(), RunOpts::default()).await.unwrap_err();
    match err {
        CoderError::Backend { code, message } => {
            assert_eq!(code, ErrorCode::BackendError);
            assert!(message.contains("something broke"));
        }
        other => panic!("Expected Backend error, got {:?}", other),
    }
}

const CODEX_SCRIPT: &str = r#"
tid="th_fresh"; mode="new"
while [ $# -gt 0 ]; do
  case "$1" in
    resume) mode="resume"; tid="$2"; shift ;;
  esac
  shift
done
printf '{"type":"thread.started","thread_id":"%s"}\n' "$tid"
printf '{"type":"turn.started"}\n'
printf '{"type":"item.started","item":{"id":"i0","type":"command_execution","command":"ls"}}\n'
printf '{"type":"item.completed","item":{"id":"i0","type":"command_execution","command":"ls","exit_code":0}}\n'
printf '{"type":"item.completed","item":{"id":"i1","type":"agent_message","text":"%s"}}\n' "$mode"
printf '{"type":"turn.completed","usage":{"input_tokens":5,"cached_input_tokens":0,"output_tokens":1}}\n'
"#;

#[tokio::test]
async fn test_codex_thread_id_assigned_by_first_run() {
    let dir = TempDir::new().unwrap();
    let adapter = codex(&dir, CODEX_SCRIPT);
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    assert_eq!(adapter.get_thread_id(&thread), None);

    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "hi".into(), RunOpts::default()),
        TIMEOUT,
    )
    .await;
    assert!(matches!(&events[0], StreamEvent::Init { thread_id: Some(t), .. } if t == "th_fresh"));
    assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolUse { .. })));
    assert!(matches!(assert_well_formed(&events), StreamEvent::Done { .. }));
    assert_eq!(adapter.get_thread_id(&thread), Some("th_fresh".to_string()));

    let second = adapter.run(&thread, "again".into(), RunOpts::default()).await.unwrap();
    assert_eq!(second.text, "resume");
    assert_eq!(second.thread_id.as_deref(), Some("th_fresh"));
}

#[tokio::test]
async fn test_codex_resume_round_trip() {
    let dir = TempDir::new().unwrap();
    let adapter = codex(&dir, CODEX_SCRIPT);
    let thread = adapter.resume_thread("th_old", StartOpts::default()).await.unwrap();

    let result = adapter.run(&thread, "continue".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "resume");
    assert_eq!(result.thread_id.as_deref(), Some("th_old"));
}

#[tokio::test]
async fn test_codex_turn_failed_rejects_run() {
    let dir = TempDir::new().unwrap();
    let adapter = codex(
        &dir,
        "printf '{\"type\":\"thread.started\",\"thread_id\":\"t\"}\\n'\nprintf '{\"type\":\"turn.failed\",\"error\":{\"message\":\"model overloaded\"}}\\n'\n",
    );
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let err = adapter.run(&thread, "x".into(), RunOpts::default()).await.unwrap_err();
    assert!(err.to_string().contains("model overloaded"));
}

#[tokio::test]
async fn test_codex_cancel_after_timeout() {
    let dir = TempDir::new().unwrap();
    let adapter = codex(&dir, "exec sleep 30\n");
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let signal = coder_agent::CancelSignal::new();
    signal.cancel_after(Duration::from_millis(200), "timeout");

    let started = Instant::now();
    let err = adapter
        .run(&thread, "x".into(), RunOpts::default().with_signal(signal))
        .await
        .unwrap_err();
    assert!(matches!(err, CoderError::Interrupted(ref r) if r == "timeout"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

const GEMINI_SCRIPT: &str = r#"
printf '{"type":"init","session_id":"g-1","model":"gemini-2.5-pro"}\n'
printf '{"type":"message","role":"user","content":"hi"}\n'
printf '{"type":"message","role":"assistant","content":"po","delta":true}\n'
printf '{"type":"message","role":"assistant","content":"ng","delta":true}\n'
printf '{"type":"result","status":"success","stats":{"input_tokens":4,"output_tokens":2}}\n'
"#;

#[tokio::test]
async fn test_gemini_buffers_message_and_assigns_id() {
    let dir = TempDir::new().unwrap();
    let adapter = gemini(&dir, GEMINI_SCRIPT);
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();

    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "hi".into(), RunOpts::default()),
        TIMEOUT,
    )
    .await;
    assert_well_formed(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Message { text, delta: false, .. } if text == "pong")));
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Message { delta: true, .. })));
    assert_eq!(thread.id(), Some("g-1"));
}

#[tokio::test]
async fn test_gemini_partial_messages() {
    let dir = TempDir::new().unwrap();
    let adapter = gemini(&dir, GEMINI_SCRIPT);
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();

    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "hi".into(), RunOpts::default().with_partial_messages()),
        TIMEOUT,
    )
    .await;
    let deltas = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Message { delta: true, .. }))
        .count();
    assert_eq!(deltas, 2);
}

#[tokio::test]
async fn test_gemini_structured_output_soft_failure() {
    let dir = TempDir::new().unwrap();
    let adapter = gemini(&dir, GEMINI_SCRIPT);
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let schema = serde_json::json!({"type": "object", "required": ["answer"]});

    let result = adapter
        .run(&thread, "hi".into(), RunOpts::default().with_output_schema(schema))
        .await
        .unwrap();
    assert_eq!(result.text, "pong");
    assert!(result.json.is_none());
}

#[tokio::test]
async fn test_gemini_cancel_ends_with_cancelled() {
    let dir = TempDir::new().unwrap();
    let adapter = gemini(
        &dir,
        "printf '{\"type\":\"init\",\"session_id\":\"g-2\"}\\n'\nexec sleep 30\n",
    );
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();
    let signal = coder_agent::CancelSignal::new();
    signal.cancel_after(Duration::from_millis(200), "deadline");

    let started = Instant::now();
    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "long".into(), RunOpts::default().with_signal(signal)),
        TIMEOUT,
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        assert_well_formed(&events),
        StreamEvent::Cancelled { reason: Some(r) } if r == "deadline"
    ));
    assert!(!thread.is_running());
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let adapter = claude(
        &dir,
        r#"
printf '\377\376 garbage\n'
printf '\377 stderr noise\n' >&2
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"pong"}]}}\n'
printf '{"type":"result","subtype":"success","result":"pong"}\n'
"#,
    );
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();

    let events = collect_events_with_timeout(
        adapter.run_streamed(&thread, "ping".into(), RunOpts::default()),
        TIMEOUT,
    )
    .await;

    assert_well_formed(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Progress { label: Some(l), .. } if l == "unparsed")));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Message { text, .. } if text == "pong")));
}

#[tokio::test]
async fn test_large_output_after_invalid_utf8_completes() {
    let dir = TempDir::new().unwrap();
    // Well past one pipe buffer of output after the bad line
    let adapter = claude(
        &dir,
        r#"
printf '\377\n'
i=0
while [ $i -lt 4000 ]; do
  printf '{"type":"system","subtype":"status","note":"keep reading"}\n'
  i=$((i+1))
done
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"pong"}]}}\n'
printf '{"type":"result","subtype":"success","result":"pong"}\n'
"#,
    );
    let thread = adapter.start_thread(StartOpts::default()).await.unwrap();

    let result = tokio::time::timeout(
        TIMEOUT,
        adapter.run(&thread, "ping".into(), RunOpts::default()),
    )
    .await
    .expect("run should finish")
    .unwrap();
    assert_eq!(result.text, "pong");
}
