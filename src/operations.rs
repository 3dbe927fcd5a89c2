//! Process-wide accounting of in-flight storage operations.
//!
//! The counter gates graceful shutdown: the process only exits cleanly
//! once it reads zero.  Every request under `/s3/` holds an
//! [`OperationGuard`] until its response body is finished or dropped, so
//! the count is restored whether the handler succeeds, fails, or the
//! client disconnects mid-transfer.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use http_body::Body as _;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

use crate::metrics;

/// Counter of in-flight operations.  Never goes below zero.
pub trait OperationCounter: Send + Sync + 'static {
    /// Add one, returning the new count.
    fn increment(&self) -> u64;

    /// Subtract one unless already zero, returning the new count.
    fn decrement(&self) -> u64;

    fn current(&self) -> u64;
}

/// Lock-free [`OperationCounter`].
#[derive(Debug, Default)]
pub struct AtomicOperationCounter {
    count: AtomicU64,
}

impl AtomicOperationCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationCounter for AtomicOperationCounter {
    fn increment(&self) -> u64 {
        let current = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_operations(current);
        current
    }

    fn decrement(&self) -> u64 {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        let current = previous.saturating_sub(1);
        metrics::set_active_operations(current);
        current
    }

    fn current(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// RAII guard holding one unit of the operation count.
pub struct OperationGuard {
    counter: Arc<dyn OperationCounter>,
}

impl OperationGuard {
    pub fn acquire(counter: Arc<dyn OperationCounter>) -> Self {
        let current = counter.increment();
        debug!("Operation started, {} in flight", current);
        Self { counter }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let current = self.counter.decrement();
        debug!("Operation finished, {} in flight", current);
    }
}

/// Middleware counting every request under `/s3/` as an in-flight operation.
pub async fn track_operations(
    State(counter): State<Arc<dyn OperationCounter>>,
    req: Request,
    next: Next,
) -> Response {
    if !req.uri().path().starts_with("/s3/") {
        return next.run(req).await;
    }
    let guard = OperationGuard::acquire(counter);
    let (parts, body) = next.run(req).await.into_parts();
    Response::from_parts(
        parts,
        Body::new(GuardedBody {
            inner: body,
            _guard: guard,
        }),
    )
}

/// Response body that keeps its operation counted until the last frame is
/// sent or the body is dropped.
struct GuardedBody {
    inner: Body,
    _guard: OperationGuard,
}

impl http_body::Body for GuardedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    #[test]
    fn test_counter_never_negative() {
        let counter = AtomicOperationCounter::new();
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_concurrent_increments_and_decrements_balance() {
        let counter = Arc::new(AtomicOperationCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment();
                        counter.decrement();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_guard_restores_count_on_drop() {
        let counter: Arc<dyn OperationCounter> = Arc::new(AtomicOperationCounter::new());
        {
            let _a = OperationGuard::acquire(counter.clone());
            let _b = OperationGuard::acquire(counter.clone());
            assert_eq!(counter.current(), 2);
        }
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_when_future_is_aborted() {
        let counter: Arc<dyn OperationCounter> = Arc::new(AtomicOperationCounter::new());
        let held = counter.clone();
        let task = tokio::spawn(async move {
            let _guard = OperationGuard::acquire(held);
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        while counter.current() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_middleware_counts_only_storage_routes() {
        let counter: Arc<dyn OperationCounter> = Arc::new(AtomicOperationCounter::new());
        let observed = counter.clone();
        let seen = counter.clone();
        let app = Router::new()
            .route(
                "/s3/buckets",
                get(move || {
                    let observed = observed.clone();
                    async move { observed.current().to_string() }
                }),
            )
            .route(
                "/health",
                get(move || {
                    let seen = seen.clone();
                    async move { seen.current().to_string() }
                }),
            )
            .layer(axum::middleware::from_fn_with_state(counter.clone(), track_operations));

        let resp = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/s3/buckets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"1");

        let resp = app
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"0");

        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_operation_spans_response_body() {
        let counter: Arc<dyn OperationCounter> = Arc::new(AtomicOperationCounter::new());
        let app = Router::new()
            .route("/s3/buckets/b/objects", get(|| async { "listing" }))
            .layer(axum::middleware::from_fn_with_state(counter.clone(), track_operations));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/s3/buckets/b/objects")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Handler returned, body not yet sent.
        assert_eq!(counter.current(), 1);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"listing");
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_operation_released_when_response_dropped_unsent() {
        let counter: Arc<dyn OperationCounter> = Arc::new(AtomicOperationCounter::new());
        let app = Router::new()
            .route("/s3/buckets", get(|| async { "[]" }))
            .layer(axum::middleware::from_fn_with_state(counter.clone(), track_operations));

        let resp = app
            .oneshot(axum::http::Request::builder().uri("/s3/buckets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(counter.current(), 1);
        drop(resp);
        assert_eq!(counter.current(), 0);
    }
}
