//! The proxy handler.
//!
//! # Request lifecycle
//! ```text
//! RECEIVED
//!     → route match (404 when none)
//!     → body buffered, client fields read
//!     → metered: trust policy (403), fingerprint required (400)
//! TARGET_RESOLVED   artifact reference → affinity → fresh selection
//! QUOTA_CHECKED     metered only (429)
//! FORWARDED         identity fields stripped, deadline on first byte (502/503)
//! RESPONSE_TRANSFORMED | RESPONSE_PASSTHROUGH
//! COMPLETE          stream ended or client went away
//! ```
//! Nothing is written to the ledger or the affinity table before the
//! request has passed every client-input check.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request::Parts, HeaderMap, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::{ProxyError, ProxyResult};
use crate::http::request::{buffer_body, request_id, ClientFields, InboundRequest};
use crate::http::response::{relay, GuardedStream, StreamGuard};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::quota::{Admission, ClientIdentity};
use crate::resilience::timeouts::{first_byte, idle_timeout};
use crate::rewrite::{rewrite_stream, FrameRewriter};
use crate::routing::{Route, Target};
use crate::security::headers::{downstream_response_headers, upstream_request_headers};
use crate::security::TrustDecision;

const EVENT_STREAM: &str = "text/event-stream";

/// Backend that served a response, for access metrics.
#[derive(Debug, Clone)]
pub struct ServedBy(pub String);

/// Main proxy handler.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let request_id = request_id(&request);
    let (parts, body) = request.into_parts();

    let Some(route) = state.router.match_request(&parts) else {
        tracing::debug!(request_id = %request_id, path = %parts.uri.path(), "No route matched");
        metrics::record_request("none", 404, "none", start);
        return ProxyError::NoRoute(parts.uri.path().to_string()).into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        route = %route.name,
        "Proxying request"
    );

    let response = match forward(&state, route, parts, body, peer, &request_id).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_retryable() {
                tracing::warn!(request_id = %request_id, route = %route.name, error = %e, "Forwarding failed");
            } else {
                tracing::info!(request_id = %request_id, route = %route.name, error = %e, "Request rejected");
            }
            let backend = match &e {
                ProxyError::BackendUnavailable { backend, .. }
                | ProxyError::BackendTimeout { backend, .. } => backend.clone(),
                _ => "none".to_string(),
            };
            let mut response = e.into_response();
            response.extensions_mut().insert(ServedBy(backend));
            response
        }
    };

    let backend = response
        .extensions()
        .get::<ServedBy>()
        .map(|s| s.0.as_str())
        .unwrap_or("none");
    metrics::record_request(&route.name, response.status().as_u16(), backend, start);
    response
}

async fn forward(
    state: &AppState,
    route: &Route,
    parts: Parts,
    body: Body,
    peer: SocketAddr,
    request_id: &str,
) -> ProxyResult<Response> {
    let body = buffer_body(body, state.max_body_size).await?;
    let mut inbound = InboundRequest::new(&parts.uri, body);
    let fields = inbound.client_fields(&state.fields);

    let quota = state.quota.load_full();
    let trust = state.trust.load_full();
    let metered = route.metered && quota.enabled;

    if route.metered {
        if let TrustDecision::Untrusted(reason) = trust.evaluate(&parts.headers) {
            return Err(ProxyError::Untrusted(reason));
        }
    }
    if metered && quota.require_fingerprint && fields.fingerprint.is_none() {
        return Err(ProxyError::ClientInput(format!(
            "{} is required",
            state.fields.fingerprint
        )));
    }

    let artifact_backend = resolve_artifact(state, &mut inbound, request_id);
    let target = state
        .resolver
        .resolve(artifact_backend.as_deref(), fields.correlation_key.as_deref());

    if metered {
        admit(state, &fields, &parts.headers, peer, &quota.paid_status, request_id)?;
    }

    inbound.strip_fields(&state.fields.identity_fields());
    send(state, parts, inbound, target, &fields, peer, request_id, trust.secret_header()).await
}

/// Decode an artifact reference and point the request at the local path.
fn resolve_artifact(state: &AppState, inbound: &mut InboundRequest, request_id: &str) -> Option<String> {
    let (carrier, reference) = inbound.artifact_reference(&state.fields.artifact_param)?;
    match state.locator.decode(&reference) {
        Ok(artifact) => {
            inbound.rewrite_artifact(&carrier, &artifact.local_path);
            Some(artifact.backend_id)
        }
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "No artifact override");
            None
        }
    }
}

fn admit(
    state: &AppState,
    fields: &ClientFields,
    headers: &HeaderMap,
    peer: SocketAddr,
    paid_status: &str,
    request_id: &str,
) -> ProxyResult<()> {
    let identity = ClientIdentity::resolve(fields.fingerprint.clone(), headers, peer);
    let exempt = fields.subscription_status.as_deref() == Some(paid_status);
    let admission = state
        .ledger
        .check_and_consume(&identity, exempt, fields.job_id.as_deref());
    metrics::record_quota_decision(admission.outcome());

    match admission {
        Admission::Admit { reason, remaining } => {
            tracing::debug!(
                request_id = %request_id,
                client_ip = %identity.ip,
                outcome = reason.as_str(),
                remaining = ?remaining,
                "Quota admitted"
            );
            Ok(())
        }
        Admission::Reject { message, .. } => {
            tracing::info!(request_id = %request_id, client_ip = %identity.ip, "Daily quota exhausted");
            Err(ProxyError::QuotaExceeded { message })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send(
    state: &AppState,
    parts: Parts,
    inbound: InboundRequest,
    target: Target,
    fields: &ClientFields,
    peer: SocketAddr,
    request_id: &str,
    secret_header: &HeaderName,
) -> ProxyResult<Response> {
    let backend = target.backend.track();
    let url = backend.url_for(&inbound.path_and_query());
    let headers = upstream_request_headers(&parts.headers, peer, state.scheme, secret_header);

    let mut upstream = state
        .client
        .request(parts.method.clone(), &url)
        .headers(headers);
    let body = inbound.into_body();
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    let evict = || {
        if let Some(key) = fields.correlation_key.as_deref() {
            state.resolver.evict(key);
        }
    };

    let response = match first_byte(state.deadlines.first_byte, upstream.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            evict();
            return Err(ProxyError::BackendUnavailable {
                backend: backend.id.clone(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            evict();
            return Err(ProxyError::BackendTimeout {
                backend: backend.id.clone(),
                secs: state.deadlines.first_byte.as_secs(),
            });
        }
    };

    let status = response.status();
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        tracing::warn!(request_id = %request_id, backend = %backend.id, status = %status, "Backend reported failure");
        evict();
    }

    let rewriting = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(EVENT_STREAM));
    let headers = downstream_response_headers(response.headers(), rewriting);

    tracing::info!(
        request_id = %request_id,
        backend = %backend.id,
        source = target.source.as_str(),
        status = status.as_u16(),
        rewriting,
        "Request forwarded"
    );

    let backend_id = backend.id.clone();
    let chunks = idle_timeout(response.bytes_stream(), state.deadlines.stream_idle);
    let guard = StreamGuard::new(request_id.to_string(), backend);
    let body = if rewriting {
        let rewriter = FrameRewriter::new(
            backend_id.clone(),
            &state.stream.event_marker,
            state.stream.max_frame_bytes,
        );
        Body::from_stream(GuardedStream::new(rewrite_stream(chunks, rewriter), guard))
    } else {
        Body::from_stream(GuardedStream::new(chunks, guard))
    };

    let mut response = relay(status, headers, body);
    response.extensions_mut().insert(ServedBy(backend_id));
    Ok(response)
}
