/**
 * FLEETSIM REST API - Dashboard-facing HTTP server of the kernel
 *
 * ROLE :
 * Exposes the live fleet, per-host history, incidents and the pre-baked
 * demo dataset as a JSON array of records, with its bake metadata alongside.
 *
 * SECURITY :
 * - Header x-api-key required on every route except /health
 * - No key configured means every protected route answers 401
 */

use crate::demo::{DatasetInfo, SharedDemo};
use crate::health::{HealthTracker, KernelHealth};
use crate::state::SharedFleet;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Json, Router};
use fleetsim_engine::{DatasetRecord, EngineError, Incident, IncidentDetector, ServerState};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub fleet: SharedFleet,
    pub detector: Arc<IncidentDetector>,
    pub health_tracker: HealthTracker,
    pub demo: SharedDemo,
    pub api_key: Option<Arc<str>>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // /health stays open
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref() else {
        warn!("SECURITY: FLEETSIM_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request with missing or wrong API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/fleet", get(get_fleet))
        .route("/fleet/{hostname}", get(get_server))
        .route("/history", get(get_all_history))
        .route("/history/{hostname}", get(get_history))
        .route("/incidents", get(get_recent_incidents))
        .route("/incidents/active", get(get_active_incidents))
        .route("/datasets/demo", get(get_demo_dataset))
        .route("/datasets/demo/info", get(get_demo_info))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

fn not_found(e: EngineError) -> StatusCode {
    match e {
        EngineError::UnknownHost(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.fleet, &app.detector).await)
}

// GET /fleet
async fn get_fleet(State(app): State<AppState>) -> Json<Vec<ServerState>> {
    Json(app.fleet.lock().snapshot())
}

// GET /fleet/{hostname}
async fn get_server(
    State(app): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<ServerState>, StatusCode> {
    let fleet = app.fleet.lock();
    fleet.server(&hostname).cloned().map(Json).map_err(not_found)
}

// GET /history
async fn get_all_history(State(app): State<AppState>) -> Json<BTreeMap<String, Vec<ServerState>>> {
    Json(app.fleet.lock().all_history())
}

// GET /history/{hostname}
async fn get_history(
    State(app): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<Vec<ServerState>>, StatusCode> {
    app.fleet.lock().history(&hostname).map(Json).map_err(not_found)
}

// GET /incidents (last 10, newest last)
async fn get_recent_incidents(State(app): State<AppState>) -> Json<Vec<Incident>> {
    Json(app.detector.recent().await)
}

// GET /incidents/active
async fn get_active_incidents(State(app): State<AppState>) -> Json<Vec<Incident>> {
    Json(app.detector.active().await)
}

// GET /datasets/demo (flat record array, oldest first)
async fn get_demo_dataset(State(app): State<AppState>) -> Result<Json<Arc<Vec<DatasetRecord>>>, StatusCode> {
    let records = app.demo.lock().as_ref().map(|d| d.records.clone());
    records.map(Json).ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

// GET /datasets/demo/info
async fn get_demo_info(State(app): State<AppState>) -> Result<Json<DatasetInfo>, StatusCode> {
    let info = app.demo.lock().as_ref().map(|d| d.info());
    info.map(Json).ok_or(StatusCode::SERVICE_UNAVAILABLE)
}
