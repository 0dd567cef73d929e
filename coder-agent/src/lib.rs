// ABOUTME: Unified adapter layer over headless coding-agent CLIs (Claude Code, Codex, Gemini).
// ABOUTME: Normalizes backend output into one event model behind a registry of adapters.

pub mod cancel;
pub mod coder;
pub mod config;
pub mod error;
pub mod event;
pub mod options;
pub mod prompt;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod thread;
pub mod traits;

pub mod backends;
pub mod testing;

pub use cancel::CancelSignal;
pub use coder::Coder;
pub use config::AdaptersConfig;
pub use error::{CoderError, Result};
pub use event::{ErrorCode, RunResult, StreamEvent, Usage};
pub use options::{RunOpts, StartOpts};
pub use prompt::{PromptInput, PromptMessage};
pub use registry::{
    clear_registered_adapters, create_coder, register_adapter, unregister_adapter,
    AdapterFactory, AdapterRegistry,
};
pub use stream::{EventSink, EventStream, RunDriver, SinkClosed};
pub use thread::ThreadHandle;
pub use traits::CoderAdapter;
