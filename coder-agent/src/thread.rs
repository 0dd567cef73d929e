// ABOUTME: ThreadHandle identifies one conversation with one backend.
// ABOUTME: Cheap to clone; carries adapter-private state and the active run's cancel slot.

use crate::cancel::CancelSignal;
use crate::options::StartOpts;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Handle to a conversation with a backend.
///
/// The id is assigned at most once: at creation for backends that accept a
/// caller-chosen id, or from the backend's first report for backends that assign
/// their own. Clones share state, so an id learned during a run is visible through
/// every clone.
#[derive(Clone)]
pub struct ThreadHandle {
    provider: String,
    inner: Arc<ThreadState>,
}

/// Adapter-private thread state
pub(crate) struct ThreadState {
    id: OnceLock<String>,
    opts: StartOpts,
    /// Set once the backend has seen this conversation (resumed or run at least once)
    established: AtomicBool,
    active_run: Mutex<Option<CancelSignal>>,
    closed: AtomicBool,
}

impl ThreadHandle {
    /// New thread whose id is known up front
    pub fn new(provider: &str, id: impl Into<String>, opts: StartOpts) -> Self {
        let handle = Self::pending(provider, opts);
        let _ = handle.inner.id.set(id.into());
        handle
    }

    /// New thread whose id will be assigned by the backend during the first run
    pub fn pending(provider: &str, opts: StartOpts) -> Self {
        Self {
            provider: provider.to_string(),
            inner: Arc::new(ThreadState {
                id: OnceLock::new(),
                opts,
                established: AtomicBool::new(false),
                active_run: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Thread bound to an existing backend conversation
    pub fn resumed(provider: &str, id: impl Into<String>, opts: StartOpts) -> Self {
        let handle = Self::new(provider, id, opts);
        handle.mark_established();
        handle
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn id(&self) -> Option<&str> {
        self.inner.id.get().map(String::as_str)
    }

    /// Options captured when the thread was created
    pub fn opts(&self) -> &StartOpts {
        &self.inner.opts
    }

    /// Record the backend-assigned id. Later, different ids are ignored.
    pub fn assign_id(&self, id: &str) {
        match self.inner.id.get() {
            None => {
                if self.inner.id.set(id.to_string()).is_ok() {
                    tracing::debug!(provider = %self.provider, thread_id = %id, "Thread id assigned");
                }
            }
            Some(existing) if existing != id => {
                tracing::warn!(
                    provider = %self.provider,
                    thread_id = %existing,
                    reported = %id,
                    "Backend reported a different thread id, keeping the original"
                );
            }
            Some(_) => {}
        }
    }

    pub fn is_established(&self) -> bool {
        self.inner.established.load(Ordering::SeqCst)
    }

    pub fn mark_established(&self) {
        self.inner.established.store(true, Ordering::SeqCst);
    }

    /// Cancel the run currently active on this thread.
    ///
    /// No-op when nothing is running, after the run finished, or when called again.
    pub fn interrupt(&self, reason: &str) {
        let active = self
            .inner
            .active_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match active {
            Some(signal) => signal.cancel(reason),
            None => tracing::debug!(provider = %self.provider, "Interrupt with no active run"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .active_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub(crate) fn begin_run(&self, signal: CancelSignal) {
        let mut slot = self
            .inner
            .active_run
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            tracing::warn!(
                provider = %self.provider,
                thread_id = ?self.id(),
                "Starting a run while another is active on the same thread"
            );
        }
        *slot = Some(signal);
    }

    /// Clear the active slot if it still holds `signal`
    pub(crate) fn end_run(&self, signal: &CancelSignal) {
        let mut slot = self
            .inner
            .active_run
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| s.same_as(signal)) {
            *slot = None;
        }
    }

    pub(crate) fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("provider", &self.provider)
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}
