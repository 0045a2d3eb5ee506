use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::scheduler::Scheduler;
use crate::store::{AlertStore, AlertStats};
use crate::types::{Alert, PortDistribution, ScanStats, SnapshotEntry};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub store: Arc<AlertStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/scan", post(trigger_scan))
        .route("/api/port-status", get(port_status))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/{id}/resolve", post(resolve_alert))
        .route("/api/stats", get(get_stats))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "serving API");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct PortStatusResponse {
    current_ports: Vec<SnapshotEntry>,
    changes: crate::diff::ChangeSet,
    recent_alerts: Vec<Alert>,
    scan: ScanStats,
    is_scanning: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    ports: PortDistribution,
    alerts: AlertStats,
    scan: ScanStats,
}

#[derive(Deserialize)]
struct AlertsQuery {
    resolved: Option<bool>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct StatsQuery {
    /// Trailing window in hours, default 24.
    hours: Option<u64>,
}

async fn trigger_scan(State(app): State<AppState>) -> impl IntoResponse {
    if app.scheduler.trigger() {
        (StatusCode::ACCEPTED, Json(json!({"status": "started"})))
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({"error": "scan already in progress"})),
        )
    }
}

async fn port_status(State(app): State<AppState>) -> impl IntoResponse {
    let view = app.scheduler.view();
    Json(PortStatusResponse {
        current_ports: (*view.last_snapshot).clone(),
        changes: view.last_changes,
        recent_alerts: (*view.recent_alerts).clone(),
        scan: view.stats,
        is_scanning: app.scheduler.is_scanning(),
    })
}

async fn get_alerts(
    State(app): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> impl IntoResponse {
    let store = app.store.clone();
    let resolved = q.resolved.unwrap_or(false);
    // Store calls may sleep between retries, so keep them off the runtime.
    match tokio::task::spawn_blocking(move || store.query(resolved, q.limit)).await {
        Ok(alerts) => Json(alerts).into_response(),
        Err(e) => internal_error("alert query failed", e),
    }
}

async fn resolve_alert(State(app): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let store = app.store.clone();
    match tokio::task::spawn_blocking(move || store.resolve(id)).await {
        Ok(true) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "alert not found"})),
        )
            .into_response(),
        Err(e) => internal_error("alert resolve failed", e),
    }
}

async fn get_stats(State(app): State<AppState>, Query(q): Query<StatsQuery>) -> impl IntoResponse {
    let window = Duration::from_secs(q.hours.unwrap_or(24) * 3600);
    let store = app.store.clone();
    let alerts = match tokio::task::spawn_blocking(move || store.stats(window)).await {
        Ok(stats) => stats,
        Err(e) => return internal_error("alert stats failed", e),
    };
    let view = app.scheduler.view();
    Json(StatsResponse {
        ports: PortDistribution::from_entries(&view.last_snapshot),
        alerts,
        scan: view.stats,
    })
    .into_response()
}

fn internal_error(what: &str, e: tokio::task::JoinError) -> axum::response::Response {
    error!(error = %e, "{what}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": what})),
    )
        .into_response()
}
