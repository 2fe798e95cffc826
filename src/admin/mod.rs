//! Read-only admin API on its own listener.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::AdminConfig;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState, config: &AdminConfig) -> Router {
    let api_key: Arc<str> = Arc::from(config.api_key.as_str());
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/affinity", get(get_affinity))
        .route("/admin/quota", get(get_quota))
        .layer(middleware::from_fn_with_state(api_key, admin_auth_middleware))
        .with_state(state)
}
