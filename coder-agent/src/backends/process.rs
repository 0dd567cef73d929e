// ABOUTME: Shared subprocess plumbing for CLI backends: spawn, JSONL stdout loop, stderr capture.
// ABOUTME: Kills the child on cancellation or consumer disconnect and maps exit status to events.

use crate::error::{CoderError, Result};
use crate::event::{ErrorCode, StreamEvent};
use crate::stream::{EventSink, SinkClosed};
use crate::thread::ThreadHandle;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};

/// Stderr lines kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Maps one backend's JSONL output onto [`StreamEvent`]s
pub(crate) trait LineTranslator: Send {
    /// Translate one parsed stdout line
    fn translate(&mut self, json: Value, thread: &ThreadHandle) -> Vec<StreamEvent>;

    /// Events to emit once stdout has closed and the process exited.
    ///
    /// Anything sent after a terminal event is dropped by the sink, so a backend that
    /// already reported its own result is not overridden here.
    fn finish(&mut self, exit: &ProcessExit) -> Vec<StreamEvent> {
        exit.default_events()
    }
}

/// Exit information handed to [`LineTranslator::finish`]
#[derive(Debug)]
pub(crate) struct ProcessExit {
    pub provider: &'static str,
    pub status: ExitStatus,
    pub stderr_tail: Vec<String>,
    pub not_found: bool,
}

impl ProcessExit {
    pub fn default_events(&self) -> Vec<StreamEvent> {
        if self.not_found {
            return vec![StreamEvent::fatal(
                ErrorCode::NotFound,
                format!("{} does not know this conversation", self.provider),
            )];
        }
        if self.status.success() {
            return Vec::new();
        }
        if let Some(signal) = exit_signal(&self.status) {
            return vec![StreamEvent::fatal(
                ErrorCode::Interrupted,
                format!("{} terminated by signal {}", self.provider, signal),
            )];
        }
        let mut message = format!(
            "{} exited with status {}",
            self.provider,
            self.status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        if !self.stderr_tail.is_empty() {
            message.push_str(": ");
            message.push_str(&self.stderr_tail.join("\n"));
        }
        vec![StreamEvent::fatal(ErrorCode::BackendError, message)]
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// A fully-built CLI invocation
#[derive(Debug, Clone)]
pub(crate) struct CliInvocation {
    pub provider: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Lowercase stderr substrings meaning the resumed conversation does not exist
    pub not_found_markers: &'static [&'static str],
}

/// Spawn the CLI and pump its stdout through `translator` into `sink`
pub(crate) async fn run_cli<T: LineTranslator>(
    invocation: CliInvocation,
    mut translator: T,
    sink: EventSink,
) -> Result<()> {
    let provider = invocation.provider;
    let mut cmd = ProcessCommand::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.working_dir {
        cmd.current_dir(dir);
    }

    tracing::debug!(provider, program = %invocation.program, args = ?invocation.args, "Spawning backend CLI");

    let mut child = cmd.spawn().map_err(|e| CoderError::BackendUnavailable {
        provider: provider.to_string(),
        message: format!("failed to spawn '{}': {}", invocation.program, e),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| CoderError::BackendUnavailable {
        provider: provider.to_string(),
        message: "failed to capture stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| CoderError::BackendUnavailable {
        provider: provider.to_string(),
        message: "failed to capture stderr".to_string(),
    })?;

    let markers = invocation.not_found_markers;
    let stderr_handle = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        let mut tail: Vec<String> = Vec::new();
        let mut not_found = false;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(provider, error = %e, "Failed reading backend stderr");
                    break;
                }
            }
            let line = decode_line(&buf);
            if line.is_empty() {
                continue;
            }
            tracing::warn!(provider, stderr = %line, "Backend CLI stderr");
            let lower = line.to_lowercase();
            if markers.iter().any(|m| lower.contains(m)) {
                not_found = true;
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }
        (tail, not_found)
    });

    // Raw bytes: a non-UTF-8 line must not end the read loop
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = sink.cancelled() => {
                terminate(&mut child, provider).await;
                stderr_handle.abort();
                return Ok(());
            }
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    buf.clear();
                    if line.is_empty() {
                        continue;
                    }
                    let events = match serde_json::from_str::<Value>(&line) {
                        Ok(json) => translator.translate(json, sink.thread()),
                        Err(_) => {
                            tracing::debug!(provider, line = %line, "Unparseable backend output");
                            vec![StreamEvent::progress("unparsed", Value::String(line))]
                        }
                    };
                    for event in events {
                        match sink.send(event).await {
                            Ok(()) | Err(SinkClosed::Finished) => {}
                            Err(SinkClosed::Cancelled) | Err(SinkClosed::Disconnected) => {
                                terminate(&mut child, provider).await;
                                stderr_handle.abort();
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(provider, error = %e, "Failed reading backend stdout");
                    break;
                }
            }
        }
    }
    drop(reader);

    let status = tokio::select! {
        biased;
        _ = sink.cancelled() => {
            terminate(&mut child, provider).await;
            stderr_handle.abort();
            return Ok(());
        }
        status = child.wait() => status?,
    };
    let (stderr_tail, not_found) = match stderr_handle.await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!(provider, error = %e, "stderr reader task failed to complete");
            (Vec::new(), false)
        }
    };

    tracing::debug!(provider, status = ?status, "Backend CLI exited");

    let exit = ProcessExit {
        provider,
        status,
        stderr_tail,
        not_found,
    };
    for event in translator.finish(&exit) {
        if sink.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn terminate(child: &mut Child, provider: &'static str) {
    tracing::debug!(provider, pid = ?child.id(), "Killing backend CLI");
    if let Err(e) = child.start_kill() {
        tracing::debug!(provider, error = %e, "Backend CLI already gone");
    }
    let _ = child.wait().await;
}

/// Decode one output line, replacing invalid UTF-8 and trimming whitespace
fn decode_line(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).trim().to_string()
}

/// String field lookup used by every translator
pub(crate) fn str_field<'a>(json: &'a Value, key: &str) -> Option<&'a str> {
    json.get(key).and_then(Value::as_str)
}
