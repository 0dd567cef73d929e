// ABOUTME: Mock adapter for testing - returns pre-configured event scripts.
// ABOUTME: Allows deterministic tests without spawning real coding-agent processes.
//!
//! # Example
//!
//! ```no_run
//! use coder_agent::backends::mock::MockAdapter;
//! use coder_agent::{CoderAdapter, RunOpts, StartOpts};
//!
//! # async fn example() {
//! let mock = MockAdapter::new()
//!     .on_prompt("ping").respond_text("pong")
//!     .on_prompt("fail").respond_error(coder_agent::ErrorCode::RateLimited, "slow down");
//!
//! let thread = mock.start_thread(StartOpts::default()).await.unwrap();
//! let result = mock.run(&thread, "ping".into(), RunOpts::default()).await.unwrap();
//! assert_eq!(result.text, "pong");
//! # }
//! ```

use crate::error::Result;
use crate::event::{ErrorCode, StreamEvent};
use crate::options::{RunOpts, StartOpts};
use crate::prompt::PromptInput;
use crate::registry::AdapterFactory;
use crate::stream::{EventStream, RunDriver, DEFAULT_CANCEL_GRACE};
use crate::thread::ThreadHandle;
use crate::traits::CoderAdapter;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CODER_NAME: &str = "mock";

/// Mock adapter for testing
#[derive(Clone)]
pub struct MockAdapter {
    script: Arc<MockScript>,
    defaults: StartOpts,
    grace: Duration,
}

#[derive(Default)]
struct MockScript {
    expectations: Mutex<VecDeque<Expectation>>,
    received: Mutex<Vec<String>>,
    thread_counter: AtomicU64,
    echo: bool,
}

#[derive(Clone)]
struct Expectation {
    pattern: String,
    events: Vec<StreamEvent>,
    delay: Option<Duration>,
    ending: Ending,
}

/// What the scripted run does after its events are sent
#[derive(Clone, Copy, PartialEq, Eq)]
enum Ending {
    Finish,
    /// Wait for cancellation, then stop
    Hang,
    /// Ignore cancellation entirely; only the driver's grace period ends the run
    Stuck,
}

impl MockAdapter {
    /// Create a new mock adapter with no expectations
    pub fn new() -> Self {
        Self::with_script(MockScript::default())
    }

    /// A mock that answers every unmatched prompt with the prompt text
    pub fn echo() -> Self {
        Self::with_script(MockScript {
            echo: true,
            ..Default::default()
        })
    }

    fn with_script(script: MockScript) -> Self {
        Self {
            script: Arc::new(script),
            defaults: StartOpts::default(),
            grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Set the cancellation grace period for runs of this adapter
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Set up an expectation for a prompt containing `pattern`
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            adapter: self,
            pattern: pattern.to_string(),
            delay: None,
        }
    }

    /// Prompts received so far, serialized as the backend saw them
    pub fn received_prompts(&self) -> Vec<String> {
        self.script
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Factory for the registry. Every adapter it creates shares this mock's script.
    pub fn factory(self) -> AdapterFactory {
        Arc::new(move |defaults| {
            let adapter = MockAdapter {
                script: self.script.clone(),
                defaults,
                grace: self.grace,
            };
            Ok(Arc::new(adapter) as Arc<dyn CoderAdapter>)
        })
    }

    /// Match expectations with FIFO preference: the front first, then the first match
    fn take_expectation(&self, text: &str) -> Option<Expectation> {
        let mut exp = self
            .script
            .expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match exp.front() {
            Some(front) if text.contains(&front.pattern) => exp.pop_front(),
            Some(_) => exp
                .iter()
                .position(|e| text.contains(&e.pattern))
                .and_then(|i| exp.remove(i)),
            None => None,
        }
    }

    fn fallback(&self, text: &str) -> Expectation {
        let reply = if self.script.echo {
            text.to_string()
        } else {
            format!("Mock: no expectation for '{}'", text)
        };
        Expectation {
            pattern: String::new(),
            events: vec![StreamEvent::assistant_text(reply), StreamEvent::done()],
            delay: None,
            ending: Ending::Finish,
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CoderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        CODER_NAME
    }

    fn start_thread<'a>(&'a self, opts: StartOpts) -> BoxFuture<'a, Result<ThreadHandle>> {
        Box::pin(async move {
            let opts = opts.merged_over(&self.defaults);
            if let Some(id) = opts.resume.clone() {
                return Ok(ThreadHandle::resumed(CODER_NAME, id, opts));
            }
            let n = self.script.thread_counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ThreadHandle::new(CODER_NAME, format!("mock-thread-{}", n), opts))
        })
    }

    fn resume_thread<'a>(
        &'a self,
        thread_id: &'a str,
        opts: StartOpts,
    ) -> BoxFuture<'a, Result<ThreadHandle>> {
        Box::pin(async move {
            let opts = opts.merged_over(&self.defaults);
            Ok(ThreadHandle::resumed(CODER_NAME, thread_id, opts))
        })
    }

    fn run_streamed(&self, thread: &ThreadHandle, input: PromptInput, run_opts: RunOpts) -> EventStream {
        let text = input.to_prompt();
        self.script
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.clone());

        let script = self
            .take_expectation(&text)
            .unwrap_or_else(|| self.fallback(&text));

        RunDriver::new(thread, run_opts.signal, self.grace).spawn(move |sink| async move {
            sink.thread().mark_established();
            for event in script.events {
                if let Some(delay) = script.delay {
                    tokio::time::sleep(delay).await;
                }
                if sink.send(event).await.is_err() {
                    return Ok(());
                }
            }
            match script.ending {
                Ending::Finish => {}
                Ending::Hang => sink.cancelled().await,
                Ending::Stuck => futures::future::pending::<()>().await,
            }
            Ok(())
        })
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    adapter: MockAdapter,
    pattern: String,
    delay: Option<Duration>,
}

impl ExpectationBuilder {
    /// Wait `delay` before each scripted event
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, events: Vec<StreamEvent>, ending: Ending) -> MockAdapter {
        self.adapter
            .script
            .expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation {
                pattern: self.pattern,
                events,
                delay: self.delay,
                ending,
            });
        self.adapter
    }

    /// Respond with a list of events
    pub fn respond_with(self, events: Vec<StreamEvent>) -> MockAdapter {
        self.push(events, Ending::Finish)
    }

    /// Respond with one final assistant message
    pub fn respond_text(self, text: &str) -> MockAdapter {
        self.respond_with(vec![StreamEvent::assistant_text(text), StreamEvent::done()])
    }

    /// Respond with a terminal error
    pub fn respond_error(self, code: ErrorCode, message: &str) -> MockAdapter {
        self.respond_with(vec![StreamEvent::fatal(code, message)])
    }

    /// Send `events`, then keep running until the run is cancelled
    pub fn hang(self, events: Vec<StreamEvent>) -> MockAdapter {
        self.push(events, Ending::Hang)
    }

    /// Send `events`, then never stop, even when cancelled
    pub fn hang_ignoring_cancel(self, events: Vec<StreamEvent>) -> MockAdapter {
        self.push(events, Ending::Stuck)
    }
}
