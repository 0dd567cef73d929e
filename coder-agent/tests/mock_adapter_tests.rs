// ABOUTME: Tests for the MockAdapter and the run driver's stream guarantees.
// ABOUTME: Covers well-formed streams, cancellation, interrupt idempotence and structured output.

use coder_agent::backends::mock::MockAdapter;
use coder_agent::testing::{assert_well_formed, collect_events, collect_events_with_timeout};
use coder_agent::{
    CancelSignal, CoderAdapter, CoderError, ErrorCode, PromptInput, PromptMessage, RunOpts,
    StartOpts, StreamEvent,
};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_respond_text_stream_is_well_formed() {
    let mock = MockAdapter::new().on_prompt("hello").respond_text("Hi there!");
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();

    let events = collect_events(mock.run_streamed(&thread, "hello".into(), RunOpts::default())).await;

    assert_well_formed(&events);
    assert!(matches!(&events[0], StreamEvent::Init { provider, thread_id: Some(id) }
        if provider == "mock" && id == "mock-thread-1"));
    assert!(matches!(&events[1], StreamEvent::Message { text, .. } if text == "Hi there!"));
    assert!(matches!(&events[2], StreamEvent::Done { .. }));
}

#[tokio::test]
async fn test_tool_events_pass_through() {
    let mock = MockAdapter::new().on_prompt("read file").respond_with(vec![
        StreamEvent::ToolUse {
            name: "Read".to_string(),
            payload: json!({"path": "/tmp/foo"}),
            raw: None,
        },
        StreamEvent::ToolResult {
            name: "Read".to_string(),
            payload: json!({"content": "file contents"}),
            raw: None,
        },
        StreamEvent::assistant_text("Read the file"),
        StreamEvent::done(),
    ]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let events = collect_events(mock.run_streamed(&thread, "read file".into(), RunOpts::default())).await;

    assert_eq!(events.len(), 5);
    assert!(matches!(&events[1], StreamEvent::ToolUse { name, .. } if name == "Read"));
    assert!(matches!(&events[2], StreamEvent::ToolResult { name, .. } if name == "Read"));
    assert_well_formed(&events);
}

#[tokio::test]
async fn test_events_after_terminal_are_dropped() {
    let mock = MockAdapter::new().on_prompt("x").respond_with(vec![
        StreamEvent::assistant_text("first"),
        StreamEvent::done(),
        StreamEvent::assistant_text("too late"),
        StreamEvent::fatal(ErrorCode::BackendError, "also too late"),
    ]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let events = collect_events(mock.run_streamed(&thread, "x".into(), RunOpts::default())).await;

    assert_eq!(events.len(), 3);
    assert!(matches!(assert_well_formed(&events), StreamEvent::Done { .. }));
}

#[tokio::test]
async fn test_missing_terminal_gets_done() {
    let mock = MockAdapter::new()
        .on_prompt("x")
        .respond_with(vec![StreamEvent::assistant_text("no done")]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let events = collect_events(mock.run_streamed(&thread, "x".into(), RunOpts::default())).await;

    assert!(matches!(assert_well_formed(&events), StreamEvent::Done { usage: None }));
}

#[tokio::test]
async fn test_error_response_rejects_run() {
    let mock = MockAdapter::new()
        .on_prompt("fail")
        .respond_error(ErrorCode::RateLimited, "Something went wrong");
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();

    let err = mock.run(&thread, "fail".into(), RunOpts::default()).await.unwrap_err();
    match err {
        CoderError::Backend { code, message } => {
            assert_eq!(code, ErrorCode::RateLimited);
            assert_eq!(message, "Something went wrong");
        }
        other => panic!("Expected Backend error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unmatched_prompt_gets_fallback() {
    let mock = MockAdapter::new();
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let result = mock.run(&thread, "anything".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "Mock: no expectation for 'anything'");
}

#[tokio::test]
async fn test_echo_mode_repeats_prompt() {
    let mock = MockAdapter::echo();
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let result = mock.run(&thread, "say this".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "say this");
}

#[tokio::test]
async fn test_expectations_prefer_fifo_order() {
    let mock = MockAdapter::new()
        .on_prompt("step")
        .respond_text("one")
        .on_prompt("step")
        .respond_text("two");
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let first = mock.run(&thread, "step".into(), RunOpts::default()).await.unwrap();
    let second = mock.run(&thread, "step".into(), RunOpts::default()).await.unwrap();
    assert_eq!(first.text, "one");
    assert_eq!(second.text, "two");
}

#[tokio::test]
async fn test_message_prompt_serialization() {
    let mock = MockAdapter::echo();
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let input = PromptInput::Messages(vec![
        PromptMessage::new("system", "be brief"),
        PromptMessage::new("user", "hi"),
    ]);
    let result = mock.run(&thread, input, RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "system: be brief\nuser: hi");
    assert_eq!(mock.received_prompts(), vec!["system: be brief\nuser: hi"]);
}

#[tokio::test]
async fn test_resume_reports_same_thread_id() {
    let mock = MockAdapter::echo();
    let thread = mock
        .resume_thread("existing-42", StartOpts::default())
        .await
        .unwrap();
    assert_eq!(mock.get_thread_id(&thread), Some("existing-42".to_string()));

    let result = mock.run(&thread, "continue".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.thread_id.as_deref(), Some("existing-42"));
}

#[tokio::test]
async fn test_start_with_resume_option_binds_id() {
    let mock = MockAdapter::echo();
    let opts = StartOpts {
        resume: Some("prior".to_string()),
        ..Default::default()
    };
    let thread = mock.start_thread(opts).await.unwrap();
    assert_eq!(thread.id(), Some("prior"));
}

#[tokio::test]
async fn test_interrupt_mid_run_yields_cancelled() {
    let mock = MockAdapter::new()
        .on_prompt("long")
        .hang(vec![StreamEvent::progress("working", json!({}))]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let mut stream = mock.run_streamed(&thread, "long".into(), RunOpts::default());

    assert!(matches!(stream.recv().await, Some(StreamEvent::Init { .. })));
    assert!(matches!(stream.recv().await, Some(StreamEvent::Progress { .. })));
    assert!(thread.is_running());

    thread.interrupt("user requested");
    let rest = collect_events_with_timeout(stream, Duration::from_secs(5)).await;

    assert_eq!(rest.len(), 1);
    match &rest[0] {
        StreamEvent::Cancelled { reason } => assert_eq!(reason.as_deref(), Some("user requested")),
        other => panic!("Expected Cancelled, got {:?}", other),
    }
    assert!(!thread.is_running());
}

#[tokio::test]
async fn test_interrupt_is_idempotent() {
    let mock = MockAdapter::new()
        .on_prompt("long")
        .hang(vec![])
        .on_prompt("next")
        .respond_text("still works");
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let stream = mock.run_streamed(&thread, "long".into(), RunOpts::default());

    thread.interrupt("first");
    thread.interrupt("second");
    let events = collect_events_with_timeout(stream, Duration::from_secs(5)).await;
    match assert_well_formed(&events) {
        StreamEvent::Cancelled { reason } => assert_eq!(reason.as_deref(), Some("first")),
        other => panic!("Expected Cancelled, got {:?}", other),
    }

    // After completion, interrupting again does nothing and the thread stays usable
    thread.interrupt("late");
    let result = mock.run(&thread, "next".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "still works");
}

#[tokio::test]
async fn test_interrupt_without_active_run_is_noop() {
    let mock = MockAdapter::echo();
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    thread.interrupt("nothing running");
    let result = mock.run(&thread, "ok".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "ok");
}

#[tokio::test]
async fn test_cancelled_run_rejects_with_interrupted() {
    let mock = MockAdapter::new().on_prompt("long").hang(vec![]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let signal = CancelSignal::new();
    signal.cancel_after(Duration::from_millis(50), "deadline");

    let err = mock
        .run(&thread, "long".into(), RunOpts::default().with_signal(signal))
        .await
        .unwrap_err();
    assert!(matches!(err, CoderError::Interrupted(ref reason) if reason == "deadline"));
    assert_eq!(err.code(), ErrorCode::Interrupted);
}

#[tokio::test]
async fn test_pre_cancelled_signal_still_well_formed() {
    let mock = MockAdapter::echo();
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let signal = CancelSignal::new();
    signal.cancel("before start");

    let events = collect_events_with_timeout(
        mock.run_streamed(&thread, "hi".into(), RunOpts::default().with_signal(signal)),
        Duration::from_secs(5),
    )
    .await;
    assert!(matches!(assert_well_formed(&events), StreamEvent::Cancelled { .. }));
}

#[tokio::test]
async fn test_backend_ignoring_cancel_is_dropped_after_grace() {
    let mock = MockAdapter::new()
        .with_grace(Duration::from_millis(100))
        .on_prompt("stuck")
        .hang_ignoring_cancel(vec![]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let stream = mock.run_streamed(&thread, "stuck".into(), RunOpts::default());

    thread.interrupt("give up");
    let events = collect_events_with_timeout(stream, Duration::from_secs(5)).await;
    assert!(matches!(assert_well_formed(&events), StreamEvent::Cancelled { .. }));
    assert!(!thread.is_running());
}

#[tokio::test]
async fn test_close_is_repeatable() {
    let mock = MockAdapter::new().on_prompt("long").hang(vec![]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let stream = mock.run_streamed(&thread, "long".into(), RunOpts::default());

    mock.close(&thread).await.unwrap();
    mock.close(&thread).await.unwrap();
    assert!(thread.is_closed());

    let events = collect_events_with_timeout(stream, Duration::from_secs(5)).await;
    assert!(matches!(assert_well_formed(&events), StreamEvent::Cancelled { .. }));
}

#[tokio::test]
async fn test_partial_deltas_replace_earlier_final_text() {
    let mock = MockAdapter::new().on_prompt("x").respond_with(vec![
        StreamEvent::assistant_text("draft"),
        StreamEvent::assistant_delta("fin"),
        StreamEvent::assistant_delta("al"),
        StreamEvent::done(),
    ]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let result = mock.run(&thread, "x".into(), RunOpts::default()).await.unwrap();
    assert_eq!(result.text, "final");
}

#[tokio::test]
async fn test_structured_output_matches_schema() {
    let mock = MockAdapter::new()
        .on_prompt("sum")
        .respond_text("```json\n{\"answer\": 4}\n```");
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let schema = json!({
        "type": "object",
        "properties": {"answer": {"type": "number"}},
        "required": ["answer"]
    });

    let result = mock
        .run(&thread, "sum 2 and 2".into(), RunOpts::default().with_output_schema(schema))
        .await
        .unwrap();
    assert_eq!(result.json, Some(json!({"answer": 4})));
}

#[tokio::test]
async fn test_schema_mismatch_is_soft_failure() {
    let mock = MockAdapter::new()
        .on_prompt("sum")
        .respond_text("The answer is four.");
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let schema = json!({"type": "object", "required": ["answer"]});

    let result = mock
        .run(&thread, "sum".into(), RunOpts::default().with_output_schema(schema))
        .await
        .unwrap();
    assert_eq!(result.text, "The answer is four.");
    assert!(result.json.is_none());
}

#[tokio::test]
async fn test_dropping_stream_releases_thread() {
    let mock = MockAdapter::new().on_prompt("long").hang(vec![]);
    let thread = mock.start_thread(StartOpts::default()).await.unwrap();
    let stream = mock.run_streamed(&thread, "long".into(), RunOpts::default());
    assert!(thread.is_running());
    drop(stream);

    tokio::time::timeout(Duration::from_secs(5), async {
        while thread.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run should be torn down after the stream is dropped");
}

#[tokio::test]
async fn test_concurrent_runs_do_not_interleave() {
    let mock = MockAdapter::echo();
    let a = mock.start_thread(StartOpts::default()).await.unwrap();
    let b = mock.start_thread(StartOpts::default()).await.unwrap();
    assert_ne!(a.id(), b.id());

    let (ra, rb) = tokio::join!(
        mock.run(&a, "alpha".into(), RunOpts::default()),
        mock.run(&b, "beta".into(), RunOpts::default())
    );
    assert_eq!(ra.unwrap().text, "alpha");
    assert_eq!(rb.unwrap().text, "beta");
}
