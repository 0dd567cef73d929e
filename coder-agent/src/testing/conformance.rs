// ABOUTME: Conformance helpers for adapter event streams.
// ABOUTME: Collects a run's events and asserts init-first, exactly-one-terminal-last.

use crate::event::StreamEvent;
use crate::stream::EventStream;
use std::time::Duration;

/// Drain `stream` until it ends
pub async fn collect_events(mut stream: EventStream) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        events.push(event);
    }
    events
}

/// Drain `stream`, panicking if it has not ended within `timeout`
pub async fn collect_events_with_timeout(stream: EventStream, timeout: Duration) -> Vec<StreamEvent> {
    match tokio::time::timeout(timeout, collect_events(stream)).await {
        Ok(events) => events,
        Err(_) => panic!("event stream did not finish within {:?}", timeout),
    }
}

/// Assert the stream invariants and return the terminal event
pub fn assert_well_formed(events: &[StreamEvent]) -> &StreamEvent {
    assert!(
        matches!(events.first(), Some(StreamEvent::Init { .. })),
        "first event must be init, got {:?}",
        events.first()
    );
    let inits = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Init { .. }))
        .count();
    assert_eq!(inits, 1, "exactly one init expected in {:?}", events);

    let terminals: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(
        terminals,
        vec![events.len() - 1],
        "exactly one terminal event, in last position, expected in {:?}",
        events
    );
    &events[events.len() - 1]
}
