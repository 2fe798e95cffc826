//! Client identity resolution.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Who a metered request is charged to.
///
/// Either signal alone identifies a returning client: a ledger record is
/// found by fingerprint or by IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub fingerprint: Option<String>,
    pub ip: String,
}

impl ClientIdentity {
    pub fn new(fingerprint: Option<String>, ip: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.filter(|f| !f.is_empty()),
            ip: ip.into(),
        }
    }

    /// Identity from a request's headers and transport peer.
    pub fn resolve(fingerprint: Option<String>, headers: &HeaderMap, peer: SocketAddr) -> Self {
        Self::new(fingerprint, client_ip(headers, peer))
    }
}

/// First `X-Forwarded-For` entry, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}
