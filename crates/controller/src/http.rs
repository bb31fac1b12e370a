//! Controller HTTP surface: the four endpoints from spec.md §4.7/§6.
//!
//! Grounded on `controller.py`'s route table and its `_get_admin`
//! f-string HTML generation (no templating crate — the original doesn't
//! use one either and the page is explicitly a trivial read-only view).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use ttsfleet_wire::WorkerReport;

use crate::errors::ControllerError;
use crate::registry::CapacityRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CapacityRegistry>,
    pub password: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/report", post(post_health_report))
        .route("/health/available_servers", get(get_available_servers))
        .route("/health/all_servers", get(get_all_servers))
        .route("/admin", get(get_admin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn authorized(headers: &HeaderMap, password: &Option<String>) -> bool {
    match password {
        None => true,
        Some(p) if p.is_empty() => true,
        Some(p) => headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {p}"))
            .unwrap_or(false),
    }
}

async fn post_health_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !authorized(&headers, &state.password) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    let report: WorkerReport = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(_) => return ControllerError::MalformedReport.into_response(),
    };
    state.registry.update(report).await;
    (StatusCode::OK, "OK").into_response()
}

async fn get_available_servers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&headers, &state.password) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    Json(state.registry.available().await).into_response()
}

async fn get_all_servers(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.password) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    Json(state.registry.all().await).into_response()
}

async fn get_admin(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.password) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }

    let servers = state.registry.all().await;
    let mut rows = String::new();
    for s in &servers {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            s.server_health.url,
            s.server_health.slack(),
            format_epoch(s.last_updated),
        ));
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Server Health Dashboard</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        table {{ border-collapse: collapse; width: 100%; }}
        th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
        th {{ background-color: #f2f2f2; }}
        tr:nth-child(even) {{ background-color: #f9f9f9; }}
    </style>
</head>
<body>
    <h1>Server Health Dashboard</h1>
    <table>
        <tr>
            <th>Url</th>
            <th>Capacity</th>
            <th>Last Check</th>
        </tr>
        {rows}
    </table>
</body>
</html>
"#
    );

    Html(html).into_response()
}

// `last_updated` is seconds since the registry's process started (see
// registry.rs), not a calendar timestamp — the dashboard shows elapsed
// time rather than a wall-clock date.
fn format_epoch(seconds_since_start: f64) -> String {
    format!("{seconds_since_start:.1}s since startup")
}
