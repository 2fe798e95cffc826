//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay backend responses as streams, never buffered whole
//! - Track each relayed stream until it ends or the client goes away
//!
//! # Design Decisions
//! - Dropping the downstream body drops the upstream one, which closes the
//!   backend connection; no explicit cancellation signal is needed
//! - Hop-by-hop headers are stripped in `security::headers`

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use futures_util::Stream;

use crate::load_balancer::backend::InFlightGuard;
use crate::observability::metrics;

/// Logs and counts a relayed stream for as long as it lives.
#[derive(Debug)]
pub struct StreamGuard {
    request_id: String,
    backend: InFlightGuard,
    started: Instant,
    completed: bool,
}

impl StreamGuard {
    pub fn new(request_id: String, backend: InFlightGuard) -> Self {
        metrics::stream_opened();
        Self {
            request_id,
            backend,
            started: Instant::now(),
            completed: false,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        metrics::stream_closed();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if self.completed {
            tracing::debug!(
                request_id = %self.request_id,
                backend = %self.backend.id,
                elapsed_ms,
                "Stream completed"
            );
        } else {
            tracing::info!(
                request_id = %self.request_id,
                backend = %self.backend.id,
                elapsed_ms,
                "Client went away, backend stream cancelled"
            );
        }
    }
}

/// A body stream carrying its `StreamGuard`.
pub struct GuardedStream<S> {
    inner: Pin<Box<S>>,
    guard: StreamGuard,
}

impl<S> GuardedStream<S> {
    pub fn new(inner: S, guard: StreamGuard) -> Self {
        Self {
            inner: Box::pin(inner),
            guard,
        }
    }
}

impl<S: Stream> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.guard.completed = true;
        }
        polled
    }
}

/// Build the client response around a relayed body.
pub fn relay(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
