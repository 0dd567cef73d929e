// ABOUTME: Prometheus metrics for the relay: runs, terminal outcomes, sessions, HTTP errors
// ABOUTME: Installs the global recorder once and exposes small recording helpers
use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Mutex;

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the Prometheus recorder, or return the handle if already installed
pub fn init_metrics() -> Result<PrometheusHandle> {
    let mut slot = HANDLE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    *slot = Some(handle.clone());
    Ok(handle)
}

pub fn record_run_started(provider: &str, streamed: bool) {
    metrics::counter!(
        "headless_coder_runs_started_total",
        "provider" => provider.to_string(),
        "mode" => if streamed { "stream" } else { "blocking" }
    )
    .increment(1);
}

/// Count a finished run by its terminal event kind (done, cancelled, error)
pub fn record_run_finished(provider: &str, terminal: &'static str) {
    metrics::counter!(
        "headless_coder_runs_finished_total",
        "provider" => provider.to_string(),
        "terminal" => terminal
    )
    .increment(1);
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("headless_coder_active_sessions").set(count as f64);
}

pub fn record_request_error(kind: &'static str) {
    metrics::counter!("headless_coder_request_errors_total", "kind" => kind).increment(1);
}
