// ABOUTME: Root library module for the headless-coder relay and CLI
// ABOUTME: Exposes configuration, metrics and the NDJSON session relay

pub mod config;
pub mod metrics;
pub mod relay;

// Re-export coder-agent types for convenience
pub use coder_agent::{AdapterRegistry, Coder, StreamEvent};
