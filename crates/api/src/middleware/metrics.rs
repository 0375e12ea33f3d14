//! Prometheus metrics middleware.
//!
//! Provides HTTP request/response metrics collection and export, plus the
//! export pipeline counters.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use domain::models::{ExportCategory, ExportJobStatus};
use domain::services::{DrainSummary, SweepReport};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let method_str = method_to_str(&method);

    counter!(
        "http_requests_total",
        "method" => method_str,
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method_str,
        "path" => path
    )
    .record(duration);

    response
}

/// Convert HTTP method to string for metric labels.
fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

pub fn record_export_requested(category: ExportCategory) {
    counter!(
        "export_jobs_requested_total",
        "category" => category.file_stem()
    )
    .increment(1);
}

pub fn record_export_finished(status: ExportJobStatus, count: usize) {
    if count > 0 {
        counter!(
            "export_jobs_finished_total",
            "status" => status.as_label()
        )
        .increment(count as u64);
    }
}

/// Counters for one worker drain pass.
pub fn record_drain(summary: &DrainSummary) {
    record_export_finished(ExportJobStatus::Completed, summary.completed);
    record_export_finished(ExportJobStatus::Failed, summary.failed);
    if summary.redelivered > 0 {
        counter!("export_tasks_nacked_total").increment(summary.redelivered as u64);
    }
}

/// Counters for one reconciliation sweep.
pub fn record_sweep(report: &SweepReport) {
    if report.requeued > 0 {
        counter!("export_sweep_requeued_total").increment(report.requeued as u64);
    }
    if report.timed_out > 0 {
        counter!("export_sweep_failed_total").increment(report.timed_out as u64);
        record_export_finished(ExportJobStatus::Failed, report.timed_out);
    }
}

/// Handler for /metrics endpoint that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
    } else {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        )
    }
}

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once during application startup before any metrics are
/// recorded. A second call is a no-op.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&[0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 30.0])?
        .install_recorder()?;

    // A racing initializer already stored its handle; keep that one.
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}
