// ABOUTME: CoderAdapter trait that every backend adapter implements.
// ABOUTME: Defines thread lifecycle, streamed and non-streamed runs, id lookup and close.

use crate::error::Result;
use crate::event::RunResult;
use crate::options::{RunOpts, StartOpts};
use crate::prompt::PromptInput;
use crate::stream::EventStream;
use crate::thread::ThreadHandle;
use futures::future::BoxFuture;

/// Core trait that all coder adapters implement.
///
/// Methods return boxed futures so the trait stays object-safe and adapters can be
/// stored as `Arc<dyn CoderAdapter>` in the registry.
pub trait CoderAdapter: Send + Sync {
    /// Backend name for logging and the `provider` field of threads and events
    fn name(&self) -> &'static str;

    /// Start a new conversation.
    ///
    /// When `opts.resume` is set this behaves like [`CoderAdapter::resume_thread`].
    fn start_thread<'a>(&'a self, opts: StartOpts) -> BoxFuture<'a, Result<ThreadHandle>>;

    /// Rebind to an existing backend conversation.
    ///
    /// Does not contact the backend; a missing conversation surfaces as a
    /// `not_found` error on the next run.
    fn resume_thread<'a>(
        &'a self,
        thread_id: &'a str,
        opts: StartOpts,
    ) -> BoxFuture<'a, Result<ThreadHandle>>;

    /// Drive the backend and stream normalized events.
    ///
    /// The stream starts with `init` and ends with exactly one terminal event.
    /// `run_opts.signal` cancels the run.
    fn run_streamed(
        &self,
        thread: &ThreadHandle,
        input: PromptInput,
        run_opts: RunOpts,
    ) -> EventStream;

    /// Run to completion and return the final assistant text
    fn run<'a>(
        &'a self,
        thread: &'a ThreadHandle,
        input: PromptInput,
        run_opts: RunOpts,
    ) -> BoxFuture<'a, Result<RunResult>> {
        let schema = run_opts.output_schema.clone();
        let stream = self.run_streamed(thread, input, run_opts);
        Box::pin(async move { stream.into_run_result(thread, schema.as_ref()).await })
    }

    /// Thread id, if one has been assigned. Never contacts the backend.
    fn get_thread_id(&self, thread: &ThreadHandle) -> Option<String> {
        thread.id().map(str::to_string)
    }

    /// Best-effort release of resources held for `thread`. Safe to call repeatedly.
    fn close<'a>(&'a self, thread: &'a ThreadHandle) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            thread.interrupt("thread closed");
            if thread.mark_closed() {
                tracing::debug!(provider = %thread.provider(), thread_id = ?thread.id(), "Thread closed");
            }
            Ok(())
        })
    }
}
