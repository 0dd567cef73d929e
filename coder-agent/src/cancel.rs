// ABOUTME: Single cancellation primitive shared by callers, threads and the run driver.
// ABOUTME: Idempotent, race-safe, first reason wins; timeouts are "cancel after N".

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reason recorded when a signal is cancelled without one
pub const DEFAULT_CANCEL_REASON: &str = "cancelled";

/// Cancellation signal passed through [`crate::RunOpts`].
///
/// Clones share state. Cancelling more than once, or after the run it guards has
/// finished, is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        let first = self.reason.set(reason.into()).is_ok();
        self.token.cancel();
        if first {
            tracing::debug!(reason = ?self.reason.get(), "Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        if !self.is_cancelled() {
            return None;
        }
        Some(
            self.reason
                .get()
                .cloned()
                .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
        )
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cancel this signal after `after` elapses, unless already cancelled
    pub fn cancel_after(&self, after: Duration, reason: impl Into<String>) {
        let signal = self.clone();
        let reason = reason.into();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal.cancelled() => {}
                _ = tokio::time::sleep(after) => signal.cancel(reason),
            }
        });
    }

    pub(crate) fn same_as(&self, other: &CancelSignal) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let signal = CancelSignal::new();
        assert!(signal.reason().is_none());
        signal.cancel("user cancel");
        signal.cancel("interrupt timeout");
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason().as_deref(), Some("user cancel"));
    }

    #[test]
    fn test_clones_share_state() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        clone.cancel("stop");
        assert!(signal.is_cancelled());
        assert!(signal.same_as(&clone));
        assert!(!signal.same_as(&CancelSignal::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fires() {
        let signal = CancelSignal::new();
        signal.cancel_after(Duration::from_secs(3), "timeout");
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(signal.reason().as_deref(), Some("timeout"));
    }
}
