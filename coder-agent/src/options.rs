// ABOUTME: Thread start options and per-run options shared across all backends.
// ABOUTME: Unknown keys are ignored so one option set can be reused across adapters.

use crate::cancel::CancelSignal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Options applied when a thread is started or resumed.
///
/// Every field is optional. Backends ignore the ones they do not support.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StartOpts {
    pub working_directory: Option<PathBuf>,
    /// Claude permission mode (e.g., "bypassPermissions")
    pub permission_mode: Option<String>,
    /// Codex sandbox mode: read-only, workspace-write, or danger-full-access
    pub sandbox_mode: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub include_directories: Option<Vec<PathBuf>>,
    /// Resume this backend conversation instead of starting a new one
    pub resume: Option<String>,
    pub fork_session: Option<bool>,
    pub model: Option<String>,
    pub skip_git_repo_check: Option<bool>,
    /// Gemini auto-approve mode
    pub yolo: Option<bool>,
    /// Extra CLI arguments appended before the prompt
    pub extra_args: Option<Vec<String>>,
}

impl StartOpts {
    /// Overlay `self` on `defaults`; fields set on `self` win.
    pub fn merged_over(&self, defaults: &StartOpts) -> StartOpts {
        StartOpts {
            working_directory: self
                .working_directory
                .clone()
                .or_else(|| defaults.working_directory.clone()),
            permission_mode: self
                .permission_mode
                .clone()
                .or_else(|| defaults.permission_mode.clone()),
            sandbox_mode: self
                .sandbox_mode
                .clone()
                .or_else(|| defaults.sandbox_mode.clone()),
            allowed_tools: self
                .allowed_tools
                .clone()
                .or_else(|| defaults.allowed_tools.clone()),
            include_directories: self
                .include_directories
                .clone()
                .or_else(|| defaults.include_directories.clone()),
            resume: self.resume.clone().or_else(|| defaults.resume.clone()),
            fork_session: self.fork_session.or(defaults.fork_session),
            model: self.model.clone().or_else(|| defaults.model.clone()),
            skip_git_repo_check: self.skip_git_repo_check.or(defaults.skip_git_repo_check),
            yolo: self.yolo.or(defaults.yolo),
            extra_args: self
                .extra_args
                .clone()
                .or_else(|| defaults.extra_args.clone()),
        }
    }

    /// Parse options from loosely-typed JSON; unrecognized keys are dropped
    pub fn from_json(value: &Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Options for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    /// Ask the backend for incremental message chunks when it supports them
    pub stream_partial_messages: bool,
    /// JSON Schema the final text should satisfy
    pub output_schema: Option<Value>,
    /// Cancellation signal for this run
    pub signal: Option<CancelSignal>,
}

impl RunOpts {
    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_partial_messages(mut self) -> Self {
        self.stream_partial_messages = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_time_wins_on_conflict() {
        let defaults = StartOpts {
            model: Some("default-model".to_string()),
            sandbox_mode: Some("read-only".to_string()),
            ..Default::default()
        };
        let call = StartOpts {
            model: Some("call-model".to_string()),
            ..Default::default()
        };
        let merged = call.merged_over(&defaults);
        assert_eq!(merged.model.as_deref(), Some("call-model"));
        assert_eq!(merged.sandbox_mode.as_deref(), Some("read-only"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let opts = StartOpts::from_json(&json!({
            "workingDirectory": "/tmp/work",
            "yolo": true,
            "someVendorFlag": 42
        }))
        .unwrap();
        assert_eq!(opts.working_directory, Some(PathBuf::from("/tmp/work")));
        assert_eq!(opts.yolo, Some(true));
    }

    #[test]
    fn test_malformed_known_key_is_configuration_error() {
        let err = StartOpts::from_json(&json!({ "yolo": "very" })).unwrap_err();
        assert!(err.is_configuration());
    }
}
