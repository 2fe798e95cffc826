//! Read-only credit check.
//!
//! `POST /api/check-credit` with `{"fingerprint": ..., "subscriptionStatus": ...}`
//! answers `{"credits_remaining": n | "unlimited", "daily_limit": n}` and
//! never consumes quota.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::ProxyError;
use crate::http::request::{buffer_body, request_id, InboundRequest};
use crate::http::server::AppState;
use crate::quota::{ClientIdentity, Remaining};
use crate::security::TrustDecision;

#[derive(Debug, Serialize)]
pub struct CreditStatus {
    pub credits_remaining: Remaining,
    pub daily_limit: u32,
}

pub async fn credit_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request_id = request_id(&request);
    match check_credit(&state, peer, request).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            tracing::info!(request_id = %request_id, error = %e, "Credit check rejected");
            e.into_response()
        }
    }
}

async fn check_credit(
    state: &AppState,
    peer: SocketAddr,
    request: Request<Body>,
) -> Result<CreditStatus, ProxyError> {
    let (parts, body) = request.into_parts();

    if let TrustDecision::Untrusted(reason) = state.trust.load().evaluate(&parts.headers) {
        return Err(ProxyError::Untrusted(reason));
    }

    let body = buffer_body(body, state.max_body_size).await?;
    let fields = InboundRequest::new(&parts.uri, body).client_fields(&state.fields);

    let Some(fingerprint) = fields.fingerprint else {
        return Err(ProxyError::ClientInput(format!(
            "{} is required",
            state.fields.fingerprint
        )));
    };

    let quota = state.quota.load_full();
    let policy = state.ledger.policy();
    if !quota.enabled {
        return Ok(CreditStatus {
            credits_remaining: Remaining::Unlimited,
            daily_limit: policy.daily_limit,
        });
    }

    let identity = ClientIdentity::resolve(Some(fingerprint), &parts.headers, peer);
    let exempt = fields.subscription_status.as_deref() == Some(quota.paid_status.as_str());
    Ok(CreditStatus {
        credits_remaining: state.ledger.peek_remaining(&identity, exempt),
        daily_limit: policy.daily_limit,
    })
}
