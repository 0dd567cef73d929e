// ABOUTME: Coder facade returned by the registry; wraps one adapter instance.
// ABOUTME: Merges call-time start options over the Coder's defaults and delegates.

use crate::error::Result;
use crate::event::RunResult;
use crate::options::{RunOpts, StartOpts};
use crate::prompt::PromptInput;
use crate::stream::EventStream;
use crate::thread::ThreadHandle;
use crate::traits::CoderAdapter;
use std::sync::Arc;

/// Handle callers use to drive one kind of coding agent. Cheap to clone.
#[derive(Clone)]
pub struct Coder {
    name: String,
    adapter: Arc<dyn CoderAdapter>,
    defaults: StartOpts,
}

impl Coder {
    pub fn new(name: &str, adapter: Arc<dyn CoderAdapter>, defaults: StartOpts) -> Self {
        Self {
            name: name.to_string(),
            adapter,
            defaults,
        }
    }

    /// Name this Coder was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &StartOpts {
        &self.defaults
    }

    pub fn adapter(&self) -> &Arc<dyn CoderAdapter> {
        &self.adapter
    }

    pub async fn start_thread(&self, opts: StartOpts) -> Result<ThreadHandle> {
        let thread = self
            .adapter
            .start_thread(opts.merged_over(&self.defaults))
            .await?;
        tracing::debug!(coder = %self.name, thread_id = ?thread.id(), "Thread started");
        Ok(thread)
    }

    pub async fn resume_thread(&self, thread_id: &str, opts: StartOpts) -> Result<ThreadHandle> {
        let thread = self
            .adapter
            .resume_thread(thread_id, opts.merged_over(&self.defaults))
            .await?;
        tracing::debug!(coder = %self.name, thread_id = %thread_id, "Thread resumed");
        Ok(thread)
    }

    pub async fn run(
        &self,
        thread: &ThreadHandle,
        input: impl Into<PromptInput>,
        run_opts: RunOpts,
    ) -> Result<RunResult> {
        self.adapter.run(thread, input.into(), run_opts).await
    }

    pub fn run_streamed(
        &self,
        thread: &ThreadHandle,
        input: impl Into<PromptInput>,
        run_opts: RunOpts,
    ) -> EventStream {
        self.adapter.run_streamed(thread, input.into(), run_opts)
    }

    pub fn get_thread_id(&self, thread: &ThreadHandle) -> Option<String> {
        self.adapter.get_thread_id(thread)
    }

    /// Cancel the thread's active run, if any
    pub fn interrupt(&self, thread: &ThreadHandle, reason: &str) {
        thread.interrupt(reason);
    }

    pub async fn close(&self, thread: &ThreadHandle) -> Result<()> {
        self.adapter.close(thread).await
    }
}

impl std::fmt::Debug for Coder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coder")
            .field("name", &self.name)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}
