//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound connect + response headers with the first-byte deadline
//! - Bound silence between body chunks once streaming (optional)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - No overall deadline on streams; legitimate jobs run long
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use axum::body::Bytes;
use axum::BoxError;
use futures_util::{stream, Stream, StreamExt};
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::config::TimeoutConfig;

#[derive(Debug, Error)]
#[error("no data from backend for {0:?}")]
pub struct IdleTimeout(pub Duration);

/// Deadlines derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub connect: Duration,
    pub first_byte: Duration,
    /// `None` when idle streams are never cut.
    pub stream_idle: Option<Duration>,
}

impl From<&TimeoutConfig> for Deadlines {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            first_byte: Duration::from_secs(config.first_byte_secs),
            stream_idle: (config.stream_idle_secs > 0)
                .then(|| Duration::from_secs(config.stream_idle_secs)),
        }
    }
}

/// Run `fut` under the first-byte deadline.
pub async fn first_byte<F: Future>(deadline: Duration, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(deadline, fut).await
}

/// End the stream with an `IdleTimeout` error when no chunk arrives in time.
pub fn idle_timeout<S, E>(
    upstream: S,
    idle: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, BoxError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let state = (Box::pin(upstream), false);
    stream::unfold(state, move |(mut upstream, done)| async move {
        if done {
            return None;
        }
        let next = match idle {
            Some(limit) => match tokio::time::timeout(limit, upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let err: BoxError = Box::new(IdleTimeout(limit));
                    return Some((Err(err), (upstream, true)));
                }
            },
            None => upstream.next().await,
        };
        match next {
            Some(Ok(chunk)) => Some((Ok(chunk), (upstream, false))),
            Some(Err(e)) => Some((Err(e.into()), (upstream, true))),
            None => None,
        }
    })
}
