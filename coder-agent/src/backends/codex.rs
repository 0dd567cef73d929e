// ABOUTME: Codex CLI adapter - spawns codex exec --json and parses its JSONL stream.
// ABOUTME: The thread id comes from the thread.started event; resume uses `codex exec resume <id>`.

use super::process::{run_cli, str_field, CliInvocation, LineTranslator};
use crate::error::Result;
use crate::event::{ErrorCode, StreamEvent, Usage};
use crate::options::{RunOpts, StartOpts};
use crate::prompt::PromptInput;
use crate::registry::AdapterFactory;
use crate::stream::{EventStream, RunDriver};
use crate::thread::ThreadHandle;
use crate::traits::CoderAdapter;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub const CODER_NAME: &str = "codex";

const NOT_FOUND_MARKERS: &[&str] = &[
    "session not found",
    "no rollout found",
    "no conversation found",
];

/// Configuration for the Codex CLI adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    /// Path to the codex binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Arguments placed before `exec`
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Sandbox mode used when a thread does not set one
    #[serde(default)]
    pub sandbox_mode: Option<String>,
    #[serde(default = "super::default_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_binary() -> String {
    "codex".to_string()
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            extra_args: Vec::new(),
            sandbox_mode: None,
            cancel_grace_ms: super::default_grace_ms(),
        }
    }
}

pub struct CodexAdapter {
    config: CodexConfig,
    defaults: StartOpts,
}

impl CodexAdapter {
    pub fn new(config: CodexConfig, defaults: StartOpts) -> Self {
        Self { config, defaults }
    }

    /// Factory function for the registry
    pub fn factory(config: CodexConfig) -> AdapterFactory {
        Arc::new(move |defaults| {
            Ok(Arc::new(CodexAdapter::new(config.clone(), defaults)) as Arc<dyn CoderAdapter>)
        })
    }

    fn invocation(
        &self,
        thread: &ThreadHandle,
        prompt: String,
        schema_path: Option<&PathBuf>,
    ) -> CliInvocation {
        let opts = thread.opts();
        let mut args = self.config.extra_args.clone();
        args.push("exec".to_string());
        args.push("--json".to_string());

        if let Some(sandbox) = opts.sandbox_mode.as_ref().or(self.config.sandbox_mode.as_ref()) {
            args.push("-s".to_string());
            args.push(sandbox.clone());
        }
        if let Some(model) = &opts.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }
        if opts.skip_git_repo_check == Some(true) {
            args.push("--skip-git-repo-check".to_string());
        }
        if let Some(path) = schema_path {
            args.push("--output-schema".to_string());
            args.push(path.display().to_string());
        }
        if let Some(extra) = &opts.extra_args {
            args.extend(extra.iter().cloned());
        }

        // Flags must come before the resume subcommand
        match thread.id() {
            Some(id) if thread.is_established() => {
                args.push("resume".to_string());
                args.push(id.to_string());
            }
            _ => {
                if let Some(dir) = &opts.working_directory {
                    args.push("-C".to_string());
                    args.push(dir.display().to_string());
                }
            }
        }
        args.push(prompt);

        CliInvocation {
            provider: CODER_NAME,
            program: self.config.binary.clone(),
            args,
            working_dir: opts.working_directory.clone(),
            not_found_markers: NOT_FOUND_MARKERS,
        }
    }
}

impl CoderAdapter for CodexAdapter {
    fn name(&self) -> &'static str {
        CODER_NAME
    }

    fn start_thread<'a>(&'a self, opts: StartOpts) -> BoxFuture<'a, Result<ThreadHandle>> {
        Box::pin(async move {
            let opts = opts.merged_over(&self.defaults);
            if let Some(id) = opts.resume.clone() {
                return Ok(ThreadHandle::resumed(CODER_NAME, id, opts));
            }
            // Codex assigns the id itself; it is captured from thread.started
            Ok(ThreadHandle::pending(CODER_NAME, opts))
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
        let prompt = input.to_prompt();
        let schema_file = run_opts.output_schema.clone().map(SchemaFile::new);
        let invocation = self.invocation(thread, prompt, schema_file.as_ref().map(|f| &f.path));

        RunDriver::new(thread, run_opts.signal, super::grace(self.config.cancel_grace_ms)).spawn(
            move |sink| async move {
                if let Some(file) = &schema_file {
                    file.write().await?;
                }
                let result = run_cli(invocation, CodexTranslator::default(), sink).await;
                drop(schema_file);
                result
            },
        )
    }
}

/// Output schema written to a temporary file for `--output-schema`; removed on drop
struct SchemaFile {
    path: PathBuf,
    schema: Value,
}

impl SchemaFile {
    fn new(schema: Value) -> Self {
        let path = std::env::temp_dir().join(format!("codex-schema-{}.json", uuid::Uuid::new_v4()));
        Self { path, schema }
    }

    async fn write(&self) -> Result<()> {
        let body = serde_json::to_vec(&self.schema)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

impl Drop for SchemaFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove schema file");
            }
        }
    }
}

/// Codex JSONL translation state
#[derive(Default)]
pub(crate) struct CodexTranslator;

impl CodexTranslator {
    fn translate_item(&mut self, phase: &str, item: &Value) -> Vec<StreamEvent> {
        let item_type = str_field(item, "type").unwrap_or("");
        let completed = phase == "item.completed";

        match item_type {
            "agent_message" if completed => match str_field(item, "text") {
                Some(text) => vec![StreamEvent::Message {
                    role: "assistant".to_string(),
                    text: text.to_string(),
                    delta: false,
                    raw: Some(item.clone()),
                }],
                None => vec![StreamEvent::progress(item_type, item.clone())],
            },
            "reasoning" | "todo_list" => vec![StreamEvent::progress(item_type, item.clone())],
            "command_execution" | "mcp_tool_call" | "web_search" | "file_change" => {
                let name = tool_name(item_type, item);
                match phase {
                    "item.started" => vec![StreamEvent::ToolUse {
                        name,
                        payload: item.clone(),
                        raw: Some(item.clone()),
                    }],
                    "item.completed" => vec![StreamEvent::ToolResult {
                        name,
                        payload: item.clone(),
                        raw: Some(item.clone()),
                    }],
                    _ => vec![StreamEvent::progress(item_type, item.clone())],
                }
            }
            // Older codex builds report generic tool calls
            "tool_call" => vec![StreamEvent::ToolUse {
                name: str_field(item, "name").unwrap_or("unknown").to_string(),
                payload: item.get("input").cloned().unwrap_or(Value::Null),
                raw: Some(item.clone()),
            }],
            "tool_output" => vec![StreamEvent::ToolResult {
                name: str_field(item, "name").unwrap_or("unknown").to_string(),
                payload: item.get("output").cloned().unwrap_or(Value::Null),
                raw: Some(item.clone()),
            }],
            "error" => {
                let message = str_field(item, "message").unwrap_or("Unknown error").to_string();
                vec![StreamEvent::Error {
                    code: ErrorCode::BackendError,
                    message,
                    recoverable: true,
                    raw: Some(item.clone()),
                }]
            }
            _ => vec![StreamEvent::progress(phase, item.clone())],
        }
    }
}

impl LineTranslator for CodexTranslator {
    fn translate(&mut self, json: Value, thread: &ThreadHandle) -> Vec<StreamEvent> {
        let event_type = str_field(&json, "type").unwrap_or("").to_string();

        match event_type.as_str() {
            "thread.started" => {
                if let Some(thread_id) = str_field(&json, "thread_id") {
                    thread.assign_id(thread_id);
                    thread.mark_established();
                }
                vec![StreamEvent::progress("thread.started", json)]
            }
            "item.started" | "item.updated" | "item.completed" => match json.get("item") {
                Some(item) => self.translate_item(&event_type, item),
                None => vec![StreamEvent::progress(&event_type, json)],
            },
            "turn.completed" => {
                let usage = json.get("usage").map(extract_usage);
                vec![StreamEvent::Done { usage }]
            }
            "turn.failed" => {
                let message = json
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .unwrap_or("Codex turn failed")
                    .to_string();
                vec![StreamEvent::Error {
                    code: ErrorCode::BackendError,
                    message,
                    recoverable: false,
                    raw: Some(json),
                }]
            }
            // Stream-level errors (reconnect notices) precede turn.failed when fatal
            "error" => {
                let message = str_field(&json, "message").unwrap_or("Unknown error").to_string();
                vec![StreamEvent::Error {
                    code: ErrorCode::BackendError,
                    message,
                    recoverable: true,
                    raw: Some(json),
                }]
            }
            "" => vec![StreamEvent::progress("unknown", json)],
            other => vec![StreamEvent::progress(other, json)],
        }
    }
}

fn tool_name(item_type: &str, item: &Value) -> String {
    match item_type {
        "mcp_tool_call" => match (str_field(item, "server"), str_field(item, "tool")) {
            (Some(server), Some(tool)) => format!("{}.{}", server, tool),
            (None, Some(tool)) => tool.to_string(),
            _ => item_type.to_string(),
        },
        _ => item_type.to_string(),
    }
}

fn extract_usage(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        cache_read_tokens: usage.get("cached_input_tokens").and_then(Value::as_u64),
        cache_write_tokens: None,
        cost_usd: None,
        extra: None,
    }
}
