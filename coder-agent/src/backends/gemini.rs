// ABOUTME: Gemini CLI adapter - spawns gemini --output-format stream-json --prompt.
// ABOUTME: Buffers assistant chunks into final messages; session id comes from the init event.

use super::process::{run_cli, str_field, CliInvocation, LineTranslator, ProcessExit};
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

pub const CODER_NAME: &str = "gemini";

const NOT_FOUND_MARKERS: &[&str] = &["session not found", "no session found", "invalid session"];

/// Configuration for the Gemini CLI adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "super::default_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_binary() -> String {
    "gemini".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            extra_args: Vec::new(),
            cancel_grace_ms: super::default_grace_ms(),
        }
    }
}

pub struct GeminiAdapter {
    config: GeminiConfig,
    defaults: StartOpts,
}

impl GeminiAdapter {
    pub fn new(config: GeminiConfig, defaults: StartOpts) -> Self {
        Self { config, defaults }
    }

    pub fn factory(config: GeminiConfig) -> AdapterFactory {
        Arc::new(move |defaults| {
            Ok(Arc::new(GeminiAdapter::new(config.clone(), defaults)) as Arc<dyn CoderAdapter>)
        })
    }

    fn invocation(&self, thread: &ThreadHandle, prompt: String) -> CliInvocation {
        let opts = thread.opts();
        let mut args = self.config.extra_args.clone();
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());

        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if opts.yolo == Some(true) {
            args.push("--yolo".to_string());
        }
        if let Some(dirs) = opts.include_directories.as_ref().filter(|d| !d.is_empty()) {
            let joined: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
            args.push("--include-directories".to_string());
            args.push(joined.join(","));
        }
        if let Some(id) = thread.id().filter(|_| thread.is_established()) {
            args.push("--resume".to_string());
            args.push(id.to_string());
        }
        if let Some(extra) = &opts.extra_args {
            args.extend(extra.iter().cloned());
        }
        args.push("--prompt".to_string());
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

impl CoderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        CODER_NAME
    }

    fn start_thread<'a>(&'a self, opts: StartOpts) -> BoxFuture<'a, Result<ThreadHandle>> {
        Box::pin(async move {
            let opts = opts.merged_over(&self.defaults);
            match opts.resume.clone() {
                Some(id) => Ok(ThreadHandle::resumed(CODER_NAME, id, opts)),
                None => Ok(ThreadHandle::pending(CODER_NAME, opts)),
            }
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
        let invocation = self.invocation(thread, prompt);
        let translator = GeminiTranslator::new(run_opts.stream_partial_messages);

        RunDriver::new(thread, run_opts.signal, super::grace(self.config.cancel_grace_ms))
            .spawn(move |sink| run_cli(invocation, translator, sink))
    }
}

/// Gemini stream-json translation state
pub(crate) struct GeminiTranslator {
    partial: bool,
    /// Assistant chunks since the last flush
    buffer: String,
    /// tool_id -> tool name
    tools: HashMap<String, String>,
}

impl GeminiTranslator {
    pub(crate) fn new(partial: bool) -> Self {
        Self {
            partial,
            buffer: String::new(),
            tools: HashMap::new(),
        }
    }

    fn flush(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.buffer.is_empty() {
            events.push(StreamEvent::assistant_text(std::mem::take(&mut self.buffer)));
        }
    }

    fn translate_message(&mut self, json: Value) -> Vec<StreamEvent> {
        let role = str_field(&json, "role").unwrap_or("assistant").to_string();
        let content = str_field(&json, "content").unwrap_or_default().to_string();
        if role != "assistant" {
            return vec![StreamEvent::progress("message", json)];
        }

        let is_delta = json.get("delta").and_then(Value::as_bool).unwrap_or(false);
        if !is_delta {
            let mut events = Vec::new();
            self.buffer.push_str(&content);
            self.flush(&mut events);
            return events;
        }

        self.buffer.push_str(&content);
        if self.partial && !content.is_empty() {
            vec![StreamEvent::Message {
                role,
                text: content,
                delta: true,
                raw: Some(json),
            }]
        } else {
            Vec::new()
        }
    }

    fn translate_result(&mut self, json: Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.flush(&mut events);

        if str_field(&json, "status") == Some("error") {
            let message = json
                .get("error")
                .and_then(|e| str_field(e, "message").or_else(|| e.as_str()))
                .unwrap_or("Gemini run failed")
                .to_string();
            events.push(StreamEvent::Error {
                code: ErrorCode::BackendError,
                message,
                recoverable: false,
                raw: Some(json),
            });
            return events;
        }

        let usage = json.get("stats").map(|stats| Usage {
            input_tokens: stats.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: stats.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            cache_read_tokens: stats.get("cached").and_then(Value::as_u64),
            cache_write_tokens: None,
            cost_usd: None,
            extra: Some(stats.clone()),
        });
        events.push(StreamEvent::Done { usage });
        events
    }
}

impl LineTranslator for GeminiTranslator {
    fn translate(&mut self, json: Value, thread: &ThreadHandle) -> Vec<StreamEvent> {
        let event_type = str_field(&json, "type").unwrap_or("").to_string();
        if event_type == "message" {
            return self.translate_message(json);
        }
        if event_type == "result" {
            return self.translate_result(json);
        }

        let mut events = Vec::new();
        self.flush(&mut events);

        match event_type.as_str() {
            "init" => {
                if let Some(session_id) = str_field(&json, "session_id") {
                    thread.assign_id(session_id);
                    thread.mark_established();
                }
                events.push(StreamEvent::progress("init", json));
            }
            "tool_use" => {
                let name = str_field(&json, "tool_name").unwrap_or("unknown").to_string();
                if let Some(id) = str_field(&json, "tool_id") {
                    self.tools.insert(id.to_string(), name.clone());
                }
                events.push(StreamEvent::ToolUse {
                    name,
                    payload: json.get("parameters").cloned().unwrap_or(Value::Null),
                    raw: Some(json),
                });
            }
            "tool_result" => {
                let name = str_field(&json, "tool_id")
                    .and_then(|id| self.tools.get(id))
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                let payload = json
                    .get("output")
                    .or_else(|| json.get("error"))
                    .cloned()
                    .unwrap_or(Value::Null);
                events.push(StreamEvent::ToolResult {
                    name,
                    payload,
                    raw: Some(json),
                });
            }
            "error" => {
                let message = str_field(&json, "message").unwrap_or("Unknown error").to_string();
                events.push(StreamEvent::Error {
                    code: ErrorCode::BackendError,
                    message,
                    recoverable: true,
                    raw: Some(json),
                });
            }
            "" => events.push(StreamEvent::progress("unknown", json)),
            other => events.push(StreamEvent::progress(other, json)),
        }
        events
    }

    fn finish(&mut self, exit: &ProcessExit) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.flush(&mut events);
        events.extend(exit.default_events());
        events
    }
}
