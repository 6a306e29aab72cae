//! Prometheus metrics for the processing service.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a job state transition.
pub fn job_status_changed(status: &str) {
    counter!("lyrics_jobs_total", "status" => status.to_string()).increment(1);
}

/// Record total job duration.
pub fn job_duration(duration_ms: u64) {
    histogram!("lyrics_job_duration_ms").record(duration_ms as f64);
}

/// Record pipeline step duration.
pub fn step_duration(step_name: &str, duration_ms: u64) {
    histogram!("lyrics_step_duration_ms", "step" => step_name.to_string())
        .record(duration_ms as f64);
}

/// Set the number of jobs currently executing.
pub fn running_jobs(count: usize) {
    gauge!("lyrics_running_jobs").set(count as f64);
}

/// Record a download by source (youtube, spotify).
pub fn download_started(source: &str) {
    counter!("lyrics_downloads_total", "source" => source.to_string()).increment(1);
}

/// Record an external tool invocation and its wall time.
pub fn tool_invoked(tool: &str, duration_ms: u64) {
    counter!("lyrics_tool_invocations_total", "tool" => tool.to_string()).increment(1);
    histogram!("lyrics_tool_duration_ms", "tool" => tool.to_string()).record(duration_ms as f64);
}

/// Record a call to an upstream AI endpoint.
pub fn groq_request(endpoint: &str, ok: bool) {
    counter!(
        "lyrics_groq_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}
