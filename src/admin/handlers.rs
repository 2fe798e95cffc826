use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::quota::LedgerStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub strategy: crate::config::Strategy,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub url: String,
    pub in_flight: usize,
    /// Live affinity entries pointing at this backend.
    pub pinned_sessions: usize,
}

#[derive(Serialize)]
pub struct AffinitySummary {
    pub entries: usize,
    pub ttl_secs: u64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        strategy: state.pool().strategy(),
    })
}

pub async fn get_backends(State(state): State<AppState>) -> Json<Vec<BackendStatus>> {
    let pinned = state.affinity().pinned_per_backend();
    let statuses = state
        .pool()
        .all()
        .iter()
        .map(|b| BackendStatus {
            id: b.id.clone(),
            url: b.origin(),
            in_flight: b.in_flight(),
            pinned_sessions: pinned.get(&b.id).copied().unwrap_or(0),
        })
        .collect();
    Json(statuses)
}

pub async fn get_affinity(State(state): State<AppState>) -> Json<AffinitySummary> {
    Json(AffinitySummary {
        entries: state.affinity().len(),
        ttl_secs: state.affinity_ttl.as_secs(),
    })
}

pub async fn get_quota(State(state): State<AppState>) -> Json<LedgerStats> {
    Json(state.ledger.stats())
}
