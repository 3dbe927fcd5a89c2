//! Prometheus metrics for s3deck.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "s3deck_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "s3deck_http_request_duration_seconds";

/// Total storage operations (counter). Labels: operation, status.
pub const STORAGE_OPERATIONS_TOTAL: &str = "s3deck_storage_operations_total";

/// In-flight storage operations (gauge).
pub const ACTIVE_OPERATIONS: &str = "s3deck_active_operations";

/// Live console sessions (gauge).
pub const ACTIVE_SESSIONS: &str = "s3deck_active_sessions";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder.  Idempotent.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(STORAGE_OPERATIONS_TOTAL, "Total storage operations by type");
    describe_gauge!(ACTIVE_OPERATIONS, "Storage operations currently in flight");
    describe_gauge!(ACTIVE_SESSIONS, "Live console sessions");
}

// -- Recording helpers --------------------------------------------------------

pub fn record_storage_operation(operation: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!(STORAGE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

pub fn set_active_operations(count: u64) {
    gauge!(ACTIVE_OPERATIONS).set(count as f64);
}

pub fn set_active_sessions(count: usize) {
    gauge!(ACTIVE_SESSIONS).set(count as f64);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation.  Must be the outermost
/// layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels,
/// so bucket names and object keys never become label values.
///
/// Examples:
/// - `/auth/login` -> `/auth/login`
/// - `/s3/buckets/photos` -> `/s3/buckets/{name}`
/// - `/s3/buckets/photos/objects/a.jpg/download` -> `/s3/buckets/{name}/objects/{key}/download`
/// - anything unrouted -> `/{other}`
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/openapi.json" => "/openapi.json",
        "/status/operations" => "/status/operations",
        "/auth/login" => "/auth/login",
        "/auth/logout" => "/auth/logout",
        "/auth/refresh" => "/auth/refresh",
        "/auth/me" => "/auth/me",
        "/auth/regions" => "/auth/regions",
        "/auth/operation/start" => "/auth/operation/start",
        "/auth/operation/end" => "/auth/operation/end",
        "/auth/operations/status" => "/auth/operations/status",
        _ => normalize_storage_path(path),
    }
}

fn normalize_storage_path(path: &str) -> &'static str {
    let Some(rest) = path.strip_prefix("/s3/buckets") else {
        return "/{other}";
    };
    let segments: Vec<&str> = rest
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        [] => "/s3/buckets",
        [_] => "/s3/buckets/{name}",
        [_, "objects"] => "/s3/buckets/{name}/objects",
        [_, "objects", _] => "/s3/buckets/{name}/objects/{key}",
        [_, "objects", _, "download"] => "/s3/buckets/{name}/objects/{key}/download",
        [_, "upload"] => "/s3/buckets/{name}/upload",
        [_, "folders"] => "/s3/buckets/{name}/folders",
        _ => "/{other}",
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_fixed_routes() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/auth/login"), "/auth/login");
        assert_eq!(normalize_path("/auth/operations/status"), "/auth/operations/status");
    }

    #[test]
    fn test_normalize_path_buckets() {
        assert_eq!(normalize_path("/s3/buckets"), "/s3/buckets");
        assert_eq!(normalize_path("/s3/buckets/"), "/s3/buckets");
        assert_eq!(normalize_path("/s3/buckets/my-bucket"), "/s3/buckets/{name}");
        assert_eq!(
            normalize_path("/s3/buckets/my-bucket/objects"),
            "/s3/buckets/{name}/objects"
        );
        assert_eq!(
            normalize_path("/s3/buckets/my-bucket/upload"),
            "/s3/buckets/{name}/upload"
        );
        assert_eq!(
            normalize_path("/s3/buckets/my-bucket/folders"),
            "/s3/buckets/{name}/folders"
        );
    }

    #[test]
    fn test_normalize_path_objects() {
        assert_eq!(
            normalize_path("/s3/buckets/b/objects/a%2Fb.txt"),
            "/s3/buckets/{name}/objects/{key}"
        );
        assert_eq!(
            normalize_path("/s3/buckets/b/objects/a.txt/download"),
            "/s3/buckets/{name}/objects/{key}/download"
        );
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/wp-admin"), "/{other}");
        assert_eq!(normalize_path("/s3/buckets/b/x/y/z/w"), "/{other}");
    }
}
