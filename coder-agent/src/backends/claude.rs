// ABOUTME: Claude Code CLI adapter - spawns claude with --print --output-format stream-json.
// ABOUTME: Parses streaming JSONL from stdout into StreamEvents; resumes via --resume.

use super::process::{run_cli, str_field, CliInvocation, LineTranslator};
use crate::error::Result;
use crate::event::{ErrorCode, StreamEvent, Usage};
use crate::options::{RunOpts, StartOpts};
use crate::prompt::PromptInput;
use crate::registry::AdapterFactory;
use crate::schema::schema_instruction;
use crate::stream::{EventStream, RunDriver};
use crate::thread::ThreadHandle;
use crate::traits::CoderAdapter;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const CODER_NAME: &str = "claude";

const NOT_FOUND_MARKERS: &[&str] = &["no conversation found"];

/// Configuration for the Claude CLI adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Path to the claude binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Arguments placed before the adapter's own flags
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Pass --dangerously-skip-permissions on every run
    #[serde(default)]
    pub skip_permissions: bool,
    #[serde(default = "super::default_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_binary() -> String {
    "claude".to_string()
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            extra_args: Vec::new(),
            skip_permissions: false,
            cancel_grace_ms: super::default_grace_ms(),
        }
    }
}

pub struct ClaudeAdapter {
    config: ClaudeConfig,
    defaults: StartOpts,
}

impl ClaudeAdapter {
    pub fn new(config: ClaudeConfig, defaults: StartOpts) -> Self {
        Self { config, defaults }
    }

    /// Factory function for the registry
    pub fn factory(config: ClaudeConfig) -> AdapterFactory {
        Arc::new(move |defaults| {
            Ok(Arc::new(ClaudeAdapter::new(config.clone(), defaults)) as Arc<dyn CoderAdapter>)
        })
    }

    fn invocation(&self, thread: &ThreadHandle, prompt: String, run_opts: &RunOpts) -> CliInvocation {
        let opts = thread.opts();
        let mut args = self.config.extra_args.clone();
        args.extend(
            ["--print", "--output-format", "stream-json", "--verbose"]
                .iter()
                .map(|s| s.to_string()),
        );

        if let Some(id) = thread.id() {
            if thread.is_established() {
                args.push("--resume".to_string());
            } else {
                args.push("--session-id".to_string());
            }
            args.push(id.to_string());
        }
        if opts.fork_session == Some(true) {
            args.push("--fork-session".to_string());
        }
        if self.config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(mode) = &opts.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }
        if let Some(tools) = opts.allowed_tools.as_ref().filter(|t| !t.is_empty()) {
            args.push("--allowedTools".to_string());
            args.push(tools.join(","));
        }
        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if run_opts.stream_partial_messages {
            args.push("--include-partial-messages".to_string());
        }
        if let Some(extra) = &opts.extra_args {
            args.extend(extra.iter().cloned());
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

impl CoderAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        CODER_NAME
    }

    fn start_thread<'a>(&'a self, opts: StartOpts) -> BoxFuture<'a, Result<ThreadHandle>> {
        Box::pin(async move {
            let opts = opts.merged_over(&self.defaults);
            if let Some(id) = opts.resume.clone() {
                return Ok(ThreadHandle::resumed(CODER_NAME, id, opts));
            }
            // Claude accepts a caller-chosen session id, so the thread id is known up front
            let id = uuid::Uuid::new_v4().to_string();
            Ok(ThreadHandle::new(CODER_NAME, id, opts))
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
        let mut prompt = input.to_prompt();
        if let Some(schema) = &run_opts.output_schema {
            prompt.push_str(&schema_instruction(schema));
        }
        let invocation = self.invocation(thread, prompt, &run_opts);
        let translator = ClaudeTranslator::new(run_opts.stream_partial_messages);

        RunDriver::new(thread, run_opts.signal, super::grace(self.config.cancel_grace_ms))
            .spawn(move |sink| run_cli(invocation, translator, sink))
    }
}

/// Claude stream-json translation state
pub(crate) struct ClaudeTranslator {
    partial: bool,
    /// tool_use id -> tool name, to label tool results
    tools: HashMap<String, String>,
    saw_assistant_text: bool,
}

impl ClaudeTranslator {
    pub(crate) fn new(partial: bool) -> Self {
        Self {
            partial,
            tools: HashMap::new(),
            saw_assistant_text: false,
        }
    }

    fn translate_assistant(&mut self, json: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let content = json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array);

        for item in content.into_iter().flatten() {
            match str_field(item, "type") {
                Some("text") => {
                    let text = str_field(item, "text").unwrap_or_default();
                    if text.is_empty() {
                        continue;
                    }
                    self.saw_assistant_text = true;
                    events.push(StreamEvent::Message {
                        role: "assistant".to_string(),
                        text: text.to_string(),
                        delta: false,
                        raw: Some(item.clone()),
                    });
                }
                Some("tool_use") => {
                    let name = str_field(item, "name").unwrap_or("unknown").to_string();
                    if let Some(id) = str_field(item, "id") {
                        self.tools.insert(id.to_string(), name.clone());
                    }
                    tracing::info!(tool = %name, "Tool use detected");
                    events.push(StreamEvent::ToolUse {
                        name,
                        payload: item.get("input").cloned().unwrap_or(Value::Null),
                        raw: Some(item.clone()),
                    });
                }
                Some(other) => events.push(StreamEvent::progress(other, item.clone())),
                None => events.push(StreamEvent::progress("assistant", item.clone())),
            }
        }

        if events.is_empty() {
            events.push(StreamEvent::progress("assistant", json.clone()));
        }
        events
    }

    fn translate_user(&mut self, json: &Value) -> Vec<StreamEvent> {
        let content = json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array);

        let events: Vec<StreamEvent> = content
            .into_iter()
            .flatten()
            .filter(|item| str_field(item, "type") == Some("tool_result"))
            .map(|item| {
                let name = str_field(item, "tool_use_id")
                    .and_then(|id| self.tools.get(id))
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                StreamEvent::ToolResult {
                    name,
                    payload: item.get("content").cloned().unwrap_or(Value::Null),
                    raw: Some(item.clone()),
                }
            })
            .collect();

        if events.is_empty() {
            vec![StreamEvent::progress("user", json.clone())]
        } else {
            events
        }
    }

    fn translate_result(&mut self, json: &Value) -> Vec<StreamEvent> {
        let is_error = json
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || str_field(json, "subtype").is_some_and(|s| s != "success");

        if is_error {
            let message = str_field(json, "error")
                .or_else(|| str_field(json, "result"))
                .or_else(|| str_field(json, "subtype"))
                .unwrap_or("Unknown error")
                .to_string();
            let lower = message.to_lowercase();
            let code = if lower.contains("timeout") {
                ErrorCode::Timeout
            } else if lower.contains("rate limit") {
                ErrorCode::RateLimited
            } else if lower.contains("permission") {
                ErrorCode::PermissionDenied
            } else {
                ErrorCode::BackendError
            };
            return vec![StreamEvent::Error {
                code,
                message,
                recoverable: false,
                raw: Some(json.clone()),
            }];
        }

        let mut events = Vec::new();
        if !self.saw_assistant_text {
            // Fallback to the result field when no assistant text block was seen
            if let Some(text) = str_field(json, "result").filter(|t| !t.is_empty()) {
                events.push(StreamEvent::assistant_text(text));
            }
        }
        let usage = extract_usage(json);
        tracing::debug!(
            input_tokens = usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
            output_tokens = usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
            "Claude run completed"
        );
        events.push(StreamEvent::Done { usage });
        events
    }
}

impl LineTranslator for ClaudeTranslator {
    fn translate(&mut self, json: Value, thread: &ThreadHandle) -> Vec<StreamEvent> {
        let Some(event_type) = str_field(&json, "type").map(str::to_string) else {
            return vec![StreamEvent::progress("unknown", json)];
        };

        match event_type.as_str() {
            "system" => {
                if str_field(&json, "subtype") == Some("init") {
                    thread.mark_established();
                    if let Some(session_id) = str_field(&json, "session_id") {
                        thread.assign_id(session_id);
                    }
                }
                vec![StreamEvent::progress("system", json)]
            }
            "stream_event" => {
                let delta = json
                    .get("event")
                    .filter(|e| str_field(e, "type") == Some("content_block_delta"))
                    .and_then(|e| e.get("delta"))
                    .filter(|d| str_field(d, "type") == Some("text_delta"))
                    .and_then(|d| str_field(d, "text"))
                    .map(str::to_string);
                match delta {
                    Some(text) if self.partial => vec![StreamEvent::Message {
                        role: "assistant".to_string(),
                        text,
                        delta: true,
                        raw: Some(json.clone()),
                    }],
                    _ => vec![StreamEvent::progress("stream_event", json)],
                }
            }
            "assistant" => self.translate_assistant(&json),
            "user" => self.translate_user(&json),
            "result" => self.translate_result(&json),
            other => vec![StreamEvent::progress(other, json)],
        }
    }
}

fn extract_usage(json: &Value) -> Option<Usage> {
    let mut usage = Usage::default();
    let mut found_usage = false;

    if let Some(cost) = json.get("total_cost_usd").and_then(Value::as_f64) {
        usage.cost_usd = Some(cost);
        found_usage = true;
    }

    if let Some(usage_obj) = json.get("usage") {
        usage.input_tokens = usage_obj
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        usage.output_tokens = usage_obj
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        usage.cache_read_tokens = usage_obj
            .get("cache_read_input_tokens")
            .and_then(Value::as_u64);
        usage.cache_write_tokens = usage_obj
            .get("cache_creation_input_tokens")
            .and_then(Value::as_u64);
        found_usage = true;
    }

    // modelUsage carries per-model totals when the top-level usage is empty
    if usage.input_tokens == 0 && usage.output_tokens == 0 {
        if let Some(model_usage) = json.get("modelUsage").and_then(Value::as_object) {
            for stats in model_usage.values() {
                usage.input_tokens += stats.get("inputTokens").and_then(Value::as_u64).unwrap_or(0);
                usage.output_tokens += stats.get("outputTokens").and_then(Value::as_u64).unwrap_or(0);
                found_usage = true;
            }
        }
    }

    found_usage.then_some(usage)
}
