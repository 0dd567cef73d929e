// ABOUTME: Run driver that turns any backend producer into a well-formed event stream.
// ABOUTME: Forces init first and exactly one terminal event last; owns cancellation and teardown.

use crate::cancel::CancelSignal;
use crate::error::{CoderError, Result};
use crate::event::{RunResult, StreamEvent};
use crate::schema::structured_output;
use crate::thread::ThreadHandle;
use futures::Stream;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffered events per run before the producer waits on the consumer
pub const EVENT_BUFFER: usize = 2048;

/// Default time a backend gets to shut down after cancellation
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Receiving side of a run.
///
/// Finite and not restartable. Once the run's signal fires, buffered non-terminal
/// events are skipped so the consumer sees the terminal event promptly. Dropping the
/// stream abandons the run and tears the backend down.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    signal: CancelSignal,
}

impl EventStream {
    fn new(rx: mpsc::Receiver<StreamEvent>, signal: CancelSignal) -> Self {
        Self { rx, signal }
    }

    /// Receive the next event, or None once the terminal event has been delivered
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Signal that cancels this run
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    let is_init = matches!(event, StreamEvent::Init { .. });
                    if self.signal.is_cancelled() && !is_init && !event.is_terminal() {
                        continue;
                    }
                    return Poll::Ready(Some(event));
                }
                other => return other,
            }
        }
    }

    /// Drain the stream into a [`RunResult`].
    ///
    /// Keeps the last final assistant message; deltas received after it are
    /// concatenated and used instead. Schema failures leave `json` empty.
    pub async fn into_run_result(
        mut self,
        thread: &ThreadHandle,
        output_schema: Option<&Value>,
    ) -> Result<RunResult> {
        let mut last_final: Option<String> = None;
        let mut pending_delta = String::new();
        let mut usage = None;
        let mut outcome: Option<Result<()>> = None;

        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Message {
                    role, text, delta, ..
                } if role == "assistant" => {
                    if delta {
                        pending_delta.push_str(&text);
                    } else {
                        last_final = Some(text);
                        pending_delta.clear();
                    }
                }
                StreamEvent::Done { usage: u } => {
                    usage = u;
                    outcome = Some(Ok(()));
                }
                StreamEvent::Cancelled { reason } => {
                    outcome = Some(Err(CoderError::Interrupted(
                        reason.unwrap_or_else(|| "cancelled".to_string()),
                    )));
                }
                StreamEvent::Error {
                    code,
                    message,
                    recoverable: false,
                    ..
                } => {
                    outcome = Some(Err(CoderError::from_event(code, message)));
                }
                _ => {}
            }
        }

        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(e),
            None => {
                return Err(CoderError::Backend {
                    code: crate::ErrorCode::BackendError,
                    message: "Event stream ended without a terminal event".to_string(),
                })
            }
        }

        let text = if pending_delta.is_empty() {
            last_final.unwrap_or_default()
        } else {
            pending_delta
        };
        let json = output_schema.and_then(|schema| structured_output(&text, schema));

        Ok(RunResult {
            thread_id: thread.id().map(str::to_string),
            text,
            json,
            usage,
        })
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.get_mut().poll_event(cx)
    }
}

/// Why a producer stopped being driven
enum Outcome {
    Finished(Result<()>),
    Cancelled,
    Abandoned,
}

/// Returned by [`EventSink::send`] when the producer should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkClosed {
    /// The run was cancelled
    Cancelled,
    /// A terminal event was already recorded
    Finished,
    /// The consumer dropped the stream
    Disconnected,
}

/// Sending side handed to backend producers.
///
/// Clones share state, so a producer may feed events from several tasks.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<SinkShared>,
}

struct SinkShared {
    tx: mpsc::Sender<StreamEvent>,
    provider: String,
    thread: ThreadHandle,
    signal: CancelSignal,
    init_sent: tokio::sync::Mutex<bool>,
    terminal: Mutex<Option<StreamEvent>>,
}

impl EventSink {
    pub fn thread(&self) -> &ThreadHandle {
        &self.shared.thread
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.shared.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.signal.is_cancelled()
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        self.shared.signal.cancelled().await
    }

    /// Forward one event.
    ///
    /// Terminal events are held and written last by the driver; the first one wins.
    /// `Init` is owned by the driver and ignored here.
    pub async fn send(&self, event: StreamEvent) -> std::result::Result<(), SinkClosed> {
        if self.is_cancelled() {
            return Err(SinkClosed::Cancelled);
        }
        if matches!(event, StreamEvent::Init { .. }) {
            return Ok(());
        }

        {
            let mut terminal = self
                .shared
                .terminal
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = terminal.as_ref() {
                tracing::debug!(
                    provider = %self.shared.provider,
                    after = existing.kind(),
                    dropped = event.kind(),
                    "Dropping event produced after terminal event"
                );
                return Err(SinkClosed::Finished);
            }
            if event.is_terminal() {
                *terminal = Some(event);
                return Ok(());
            }
        }

        self.ensure_init().await?;
        self.shared
            .tx
            .send(event)
            .await
            .map_err(|_| SinkClosed::Disconnected)
    }

    async fn ensure_init(&self) -> std::result::Result<(), SinkClosed> {
        let mut sent = self.shared.init_sent.lock().await;
        if *sent {
            return Ok(());
        }
        let init = StreamEvent::Init {
            provider: self.shared.provider.clone(),
            thread_id: self.shared.thread.id().map(str::to_string),
        };
        self.shared
            .tx
            .send(init)
            .await
            .map_err(|_| SinkClosed::Disconnected)?;
        *sent = true;
        Ok(())
    }

    fn take_terminal(&self) -> Option<StreamEvent> {
        self.shared
            .terminal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn resolve_terminal(&self, outcome: Outcome) -> Option<StreamEvent> {
        if matches!(outcome, Outcome::Abandoned) {
            return None;
        }
        if let Some(terminal) = self.take_terminal() {
            return Some(terminal);
        }
        if let Some(reason) = self.shared.signal.reason() {
            return Some(StreamEvent::Cancelled {
                reason: Some(reason),
            });
        }
        Some(match outcome {
            Outcome::Finished(Ok(())) => StreamEvent::done(),
            Outcome::Finished(Err(e)) => StreamEvent::fatal(e.code(), e.to_string()),
            Outcome::Cancelled | Outcome::Abandoned => StreamEvent::Cancelled { reason: None },
        })
    }
}

/// Drives one backend interaction and guarantees the stream invariants.
pub struct RunDriver {
    provider: String,
    thread: ThreadHandle,
    signal: CancelSignal,
    grace: Duration,
}

impl RunDriver {
    pub fn new(thread: &ThreadHandle, signal: Option<CancelSignal>, grace: Duration) -> Self {
        Self {
            provider: thread.provider().to_string(),
            thread: thread.clone(),
            signal: signal.unwrap_or_default(),
            grace,
        }
    }

    /// Spawn `producer` and return the consumer side.
    ///
    /// The producer should stop when [`EventSink::send`] fails or the sink reports
    /// cancellation. If it does not stop within the grace period it is dropped.
    pub fn spawn<F, Fut>(self, producer: F) -> EventStream
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let RunDriver {
            provider,
            thread,
            signal,
            grace,
        } = self;

        thread.begin_run(signal.clone());

        let sink = EventSink {
            shared: Arc::new(SinkShared {
                tx: tx.clone(),
                provider: provider.clone(),
                thread: thread.clone(),
                signal: signal.clone(),
                init_sent: tokio::sync::Mutex::new(false),
                terminal: Mutex::new(None),
            }),
        };
        let fut = producer(sink.clone());
        let stream = EventStream::new(rx, signal.clone());

        tokio::spawn(async move {
            tracing::debug!(provider = %provider, thread_id = ?thread.id(), "Run started");
            let mut fut = Box::pin(fut);

            let outcome = tokio::select! {
                biased;
                res = &mut fut => Outcome::Finished(res),
                _ = signal.cancelled() => {
                    match tokio::time::timeout(grace, &mut fut).await {
                        Ok(_) => tracing::debug!(provider = %provider, "Backend stopped after cancellation"),
                        Err(_) => tracing::warn!(
                            provider = %provider,
                            grace_ms = grace.as_millis() as u64,
                            "Backend did not stop within grace period, dropping it"
                        ),
                    }
                    Outcome::Cancelled
                }
                _ = tx.closed() => {
                    tracing::debug!(provider = %provider, "Consumer dropped the event stream");
                    Outcome::Abandoned
                }
            };
            // Releases subprocess handles still owned by the producer
            drop(fut);

            let terminal = sink.resolve_terminal(outcome);
            thread.end_run(&signal);

            if let Some(terminal) = terminal {
                tracing::info!(
                    provider = %provider,
                    thread_id = ?thread.id(),
                    terminal = terminal.kind(),
                    "Run finished"
                );
                if sink.ensure_init().await.is_ok() {
                    let _ = tx.send(terminal).await;
                }
            }
        });

        stream
    }
}
