//! Streaming response rewriter.
//!
//! Frames are emitted as soon as their terminator arrives; the rewriter never
//! holds more than one partial line. Event frames whose payload is a
//! successful completion get their artifact paths encoded for the backend
//! that served the stream; every other byte passes through unchanged.

use std::pin::Pin;

use axum::body::Bytes;
use futures_util::{stream, Stream, StreamExt};

use crate::observability::metrics;
use crate::rewrite::frame::{classify, split_terminator, Frame, FrameDecoder, FrameKind};
use crate::rewrite::payload::{rewrite_payload, PayloadOutcome};

/// Per-response rewriting state.
#[derive(Debug)]
pub struct FrameRewriter {
    decoder: FrameDecoder,
    marker: Vec<u8>,
    backend_id: String,
}

impl FrameRewriter {
    pub fn new(backend_id: impl Into<String>, marker: &str, max_frame_bytes: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_frame_bytes),
            marker: marker.as_bytes().to_vec(),
            backend_id: backend_id.into(),
        }
    }

    /// Feed one upstream chunk; returns the bytes ready to send downstream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.decoder.feed(chunk);
        let mut out = Vec::with_capacity(chunk.len());
        while let Some(frame) = self.decoder.next_frame() {
            self.emit(frame, &mut out);
        }
        out
    }

    /// Flush whatever is buffered once upstream has ended.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(frame) = self.decoder.finish() {
            self.emit(frame, &mut out);
        }
        out
    }

    fn emit(&self, frame: Frame, out: &mut Vec<u8>) {
        if !frame.inspect {
            metrics::record_frame_passthrough("oversized");
            out.extend_from_slice(&frame.bytes);
            return;
        }

        let (content, terminator) = split_terminator(&frame.bytes);
        let FrameKind::Event { prefix, payload } = classify(content, &self.marker) else {
            out.extend_from_slice(&frame.bytes);
            return;
        };

        match rewrite_payload(payload, &self.backend_id) {
            PayloadOutcome::Rewritten { json, artifacts } => {
                tracing::debug!(
                    backend = %self.backend_id,
                    artifacts,
                    "Rewrote artifact references"
                );
                metrics::record_artifacts_rewritten(&self.backend_id, artifacts);
                out.extend_from_slice(prefix);
                out.extend_from_slice(json.as_bytes());
                out.extend_from_slice(terminator);
            }
            PayloadOutcome::Malformed => {
                metrics::record_frame_passthrough("malformed");
                out.extend_from_slice(&frame.bytes);
            }
            PayloadOutcome::Untouched => out.extend_from_slice(&frame.bytes),
        }
    }
}

/// Wrap an upstream byte stream with the rewriter.
///
/// An upstream error is forwarded as is and ends the stream; the partial
/// line still buffered at that point is dropped.
pub fn rewrite_stream<S, E>(
    upstream: S,
    rewriter: FrameRewriter,
) -> impl Stream<Item = Result<Bytes, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = RewriteState {
        upstream: Box::pin(upstream),
        rewriter,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let out = state.rewriter.push(&chunk);
                    if !out.is_empty() {
                        return Some((Ok(Bytes::from(out)), state));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    let tail = state.rewriter.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(Bytes::from(tail)), state));
                }
            }
        }
    })
}

struct RewriteState<S> {
    upstream: Pin<Box<S>>,
    rewriter: FrameRewriter,
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn rewriter() -> FrameRewriter {
        FrameRewriter::new("backend-2", "data:", 1024)
    }

    const COMPLETED: &str = r#"{"msg":"process_completed","success":true,"output":{"data":[{"name":"foo.wav"}]}}"#;

    #[test]
    fn test_completion_frame_rewritten() {
        let mut rw = rewriter();
        let out = rw.push(format!("data: {}\n\n", COMPLETED).as_bytes());
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("\n\n"));

        let payload = text.trim_start_matches("data: ").trim_end();
        let value: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["output"]["data"][0]["name"], "backend-2/foo.wav");
    }

    #[test]
    fn test_other_frames_byte_identical() {
        let mut rw = rewriter();
        let input = b"event: heartbeat\r\ndata: {\"msg\":\"estimation\"}\r\ndata: [DONE]\n: comment\n\n";
        let mut out = rw.push(input);
        out.extend(rw.finish());
        assert_eq!(out, input.to_vec());
    }

    #[test]
    fn test_split_chunks_reassembled() {
        let mut rw = rewriter();
        let frame = format!("data: {}\n", COMPLETED);
        let (a, b) = frame.as_bytes().split_at(17);
        assert!(rw.push(a).is_empty());
        let out = String::from_utf8(rw.push(b)).unwrap();
        assert!(out.contains("backend-2/foo.wav"));
    }

    #[test]
    fn test_unterminated_tail_flushed() {
        let mut rw = rewriter();
        assert!(rw.push(format!("data: {}", COMPLETED).as_bytes()).is_empty());
        let out = String::from_utf8(rw.finish()).unwrap();
        assert!(out.contains("backend-2/foo.wav"));
        assert!(!out.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_rewrite_stream() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"msg\":\"process_starts\"}\n\nda")),
            Ok(Bytes::from(format!("ta: {}\n\n", COMPLETED))),
        ];
        let out: Vec<Bytes> = rewrite_stream(stream::iter(chunks), rewriter())
            .map(|r| r.unwrap())
            .collect()
            .await;
        let joined: Vec<u8> = out.iter().flat_map(|b| b.iter().copied()).collect();
        let text = String::from_utf8(joined).unwrap();
        assert!(text.starts_with("data: {\"msg\":\"process_starts\"}\n\n"));
        assert!(text.contains("backend-2/foo.wav"));
    }

    #[tokio::test]
    async fn test_upstream_error_ends_stream() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {}\n")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from_static(b"data: never\n")),
        ];
        let items: Vec<_> = rewrite_stream(stream::iter(chunks), rewriter()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
