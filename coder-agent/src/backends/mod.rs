// ABOUTME: Backend adapter implementations (Claude, Codex, Gemini CLIs and a scripted mock).
// ABOUTME: Each adapter implements CoderAdapter on top of the shared run driver.

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod mock;

mod process;

use std::time::Duration;

pub(crate) fn default_grace_ms() -> u64 {
    crate::stream::DEFAULT_CANCEL_GRACE.as_millis() as u64
}

pub(crate) fn grace(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
