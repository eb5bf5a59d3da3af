//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use scribe_core::error::PipelineError;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

/// Record one processed voice note with its end-to-end duration.
pub fn record_voice_note(error: Option<&PipelineError>, duration_secs: f64) {
    let outcome = error.map_or("ok", PipelineError::stage);
    let labels = [("outcome", outcome.to_string())];
    metrics::counter!("voice_notes_total", &labels).increment(1);
    metrics::histogram!("voice_note_duration_seconds", &labels).record(duration_secs);
}

/// Record a webhook error response for the stage that produced it.
pub fn record_error(stage: &str) {
    let labels = [("stage", stage.to_string())];
    metrics::counter!("webhook_errors_total", &labels).increment(1);
}

/// Record a delivery status callback.
pub fn record_delivery_status(status: &str) {
    let labels = [("status", status.to_string())];
    metrics::counter!("reply_status_total", &labels).increment(1);
}
