//! Prometheus metrics.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric names the engine records.  The process has no HTTP
//! listener of its own, so the rendered exposition text is written to a
//! textfile for node-exporter to pick up.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Dispatched HTTP requests (counter). Labels: kind (listing|object), status.
pub const REQUESTS_TOTAL: &str = "remote_resource_s3_requests_total";

/// Dispatched HTTP request duration in seconds (histogram). Labels: kind.
pub const REQUEST_DURATION_SECONDS: &str = "remote_resource_s3_request_duration_seconds";

/// Directory expansions (counter). Labels: outcome.
pub const EXPANSIONS_TOTAL: &str = "remote_resource_s3_expansions_total";

/// Object requests produced by directory expansion (counter).
pub const EXPANDED_OBJECTS_TOTAL: &str = "remote_resource_s3_expanded_objects_total";

/// IAM token exchanges (counter). Labels: outcome.
pub const IAM_EXCHANGES_TOTAL: &str = "remote_resource_s3_iam_exchanges_total";

/// Secret store lookups (counter). Labels: outcome.
pub const SECRET_LOOKUPS_TOTAL: &str = "remote_resource_s3_secret_lookups_total";

/// Reconciliation passes (counter). Labels: outcome.
pub const RECONCILE_TOTAL: &str = "remote_resource_s3_reconcile_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Dispatched HTTP requests");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Dispatched HTTP request duration in seconds"
    );
    describe_counter!(EXPANSIONS_TOTAL, "Directory request expansions");
    describe_counter!(
        EXPANDED_OBJECTS_TOTAL,
        "Object requests produced by directory expansion"
    );
    describe_counter!(IAM_EXCHANGES_TOTAL, "IAM token exchanges");
    describe_counter!(SECRET_LOOKUPS_TOTAL, "Secret store lookups");
    describe_counter!(RECONCILE_TOTAL, "Reconciliation passes");
}

/// Render the current metrics, or `None` when no recorder is installed.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Write the current exposition text to `path` atomically.
pub fn write_textfile<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let Some(body) = render_metrics() else {
        return Ok(());
    };
    let path = path.as_ref();
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Bucket an HTTP status into a low-cardinality label.
pub fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
