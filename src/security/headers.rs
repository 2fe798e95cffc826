//! Header manipulation for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//! - Keep the trust secret away from backends
//! - Ask backends for unencoded bodies; the stream rewriter reads plain frames

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

/// Connection-scoped headers (RFC 9110 §7.6.1) never relayed by a proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Build the header set sent upstream.
///
/// `Host` and `Content-Length` are dropped: the client sets both from the
/// target URL and the (possibly rewritten) body.
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    peer: SocketAddr,
    scheme: &str,
    secret_header: &HeaderName,
) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(secret_header);
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let client_ip = peer.ip().to_string();
    let forwarded_for = match inbound
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, client_ip),
        _ => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        headers.insert("x-forwarded-proto", value);
    }
    if let Some(host) = inbound.get(header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
    headers
}

/// Headers relayed to the client from a backend response.
pub fn downstream_response_headers(upstream: &HeaderMap, rewriting: bool) -> HeaderMap {
    let mut headers = upstream.clone();
    strip_hop_by_hop(&mut headers);
    if rewriting {
        headers.remove(header::CONTENT_LENGTH);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.1.2.3:40000".parse().unwrap()
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-custom"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_upstream_headers() {
        let secret = HeaderName::from_static("x-proxy-secret");
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("tts.example.com"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        inbound.insert("x-proxy-secret", HeaderValue::from_static("s3cret"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        inbound.insert(header::COOKIE, HeaderValue::from_static("a=b"));

        let out = upstream_request_headers(&inbound, peer(), "http", &secret);
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get("x-proxy-secret").is_none());
        assert_eq!(out["x-forwarded-for"], "203.0.113.9, 10.1.2.3");
        assert_eq!(out["x-forwarded-proto"], "http");
        assert_eq!(out["x-forwarded-host"], "tts.example.com");
        assert_eq!(out[header::COOKIE], "a=b");
    }

    #[test]
    fn test_upstream_asks_for_identity_encoding() {
        let secret = HeaderName::from_static("x-proxy-secret");
        let mut inbound = HeaderMap::new();
        inbound.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));

        let out = upstream_request_headers(&inbound, peer(), "http", &secret);
        assert_eq!(out[header::ACCEPT_ENCODING], "identity");
        assert_eq!(out.get_all(header::ACCEPT_ENCODING).iter().count(), 1);
    }

    #[test]
    fn test_downstream_headers() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));

        assert!(downstream_response_headers(&upstream, false).contains_key(header::CONTENT_LENGTH));
        assert!(!downstream_response_headers(&upstream, true).contains_key(header::CONTENT_LENGTH));
    }
}
