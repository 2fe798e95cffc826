//! Trust policy for metered routes.
//!
//! Evaluated before the quota ledger, only on metered routes and the credit
//! check. Every strategy here reads client-controlled headers, so a
//! determined client can spoof its way past it; it only keeps casual
//! third-party pages from spending the quota.

use axum::http::{HeaderMap, HeaderName};

use crate::config::{TrustConfig, TrustMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Trusted,
    Untrusted(&'static str),
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustDecision::Trusted)
    }
}

/// A pluggable trust strategy.
pub trait TrustPolicy: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, headers: &HeaderMap) -> TrustDecision;
}

/// Accepts everything.
#[derive(Debug, Default)]
pub struct AllowAll;

impl TrustPolicy for AllowAll {
    fn evaluate(&self, _headers: &HeaderMap) -> TrustDecision {
        TrustDecision::Trusted
    }
}

/// Requires a header carrying the configured secret.
#[derive(Debug)]
pub struct SharedSecret {
    header: HeaderName,
    secret: String,
}

impl SharedSecret {
    pub fn new(header: HeaderName, secret: impl Into<String>) -> Self {
        Self {
            header,
            secret: secret.into(),
        }
    }

    fn matches(&self, headers: &HeaderMap) -> bool {
        !self.secret.is_empty()
            && headers
                .get(&self.header)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == self.secret)
    }
}

impl TrustPolicy for SharedSecret {
    fn evaluate(&self, headers: &HeaderMap) -> TrustDecision {
        if self.matches(headers) {
            TrustDecision::Trusted
        } else {
            TrustDecision::Untrusted("missing or wrong shared secret")
        }
    }
}

/// Accepts requests whose `Origin` or `Referer` starts with an allowed
/// prefix. A matching shared secret, when configured, also passes.
#[derive(Debug)]
pub struct OriginAllowlist {
    origins: Vec<String>,
    bypass: Option<SharedSecret>,
}

impl OriginAllowlist {
    pub fn new(origins: Vec<String>, bypass: Option<SharedSecret>) -> Self {
        Self { origins, bypass }
    }

    fn allowed(&self, value: &str) -> bool {
        self.origins
            .iter()
            .any(|origin| !origin.is_empty() && value.starts_with(origin.as_str()))
    }
}

impl TrustPolicy for OriginAllowlist {
    fn evaluate(&self, headers: &HeaderMap) -> TrustDecision {
        if self.bypass.as_ref().is_some_and(|s| s.matches(headers)) {
            return TrustDecision::Trusted;
        }

        let origin_ok = ["origin", "referer"].iter().any(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| self.allowed(v))
        });
        if origin_ok {
            TrustDecision::Trusted
        } else {
            TrustDecision::Untrusted("origin not allowed")
        }
    }
}

/// Active trust policy plus the secret header name, swapped as a unit on reload.
#[derive(Debug)]
pub struct TrustGate {
    policy: Box<dyn TrustPolicy>,
    secret_header: HeaderName,
}

impl TrustGate {
    pub fn from_config(config: &TrustConfig) -> Self {
        let secret_header = HeaderName::from_bytes(config.secret_header.as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static("x-proxy-secret"));
        let secret = config
            .shared_secret
            .clone()
            .filter(|s| !s.is_empty())
            .map(|s| SharedSecret::new(secret_header.clone(), s));

        let policy: Box<dyn TrustPolicy> = match config.mode {
            TrustMode::None => Box::new(AllowAll),
            TrustMode::SharedSecret => match secret {
                Some(secret) => Box::new(secret),
                // Validation rejects this; an empty secret must never match.
                None => Box::new(SharedSecret::new(secret_header.clone(), "")),
            },
            TrustMode::OriginAllowlist => {
                Box::new(OriginAllowlist::new(config.allowed_origins.clone(), secret))
            }
        };

        Self {
            policy,
            secret_header,
        }
    }

    pub fn evaluate(&self, headers: &HeaderMap) -> TrustDecision {
        self.policy.evaluate(headers)
    }

    /// Header that must never reach a backend.
    pub fn secret_header(&self) -> &HeaderName {
        &self.secret_header
    }
}
