//! `GET /ws` — upgrade handler, bearer/peer authentication, and the
//! public-vs-internal connection distinction.
//!
//! Grounded on `services/ingest-srt/src/api/sessions.rs`'s axum handler
//! style and on `server.py`'s `_validate_password` bearer check in the
//! original source.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::health::HealthAgent;
use crate::model::SessionModel;
use crate::multiplexer::ConnectionMultiplexer;
use crate::upstream::UpstreamPool;

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthAgent>,
    pub upstream: Arc<UpstreamPool>,
    pub model: Arc<dyn SessionModel>,
    pub input_timeout: Duration,
    pub output_timeout: Duration,
    pub password: Option<String>,
}

fn bearer_matches(headers: &HeaderMap, password: &str) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {password}"))
        .unwrap_or(false)
}

/// Sets `internal = true` when the distinct peer header carries a valid
/// shared secret; the end-client bearer token alone never does (spec.md
/// §9's second Design Note resolved this way — see DESIGN.md).
fn is_internal_peer(headers: &HeaderMap, password: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    headers
        .get("X-Ttsfleet-Peer")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == password)
        .unwrap_or(false)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(password) = &state.password {
        if !password.is_empty() && !bearer_matches(&headers, password) {
            return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
        }
    }

    let internal = state
        .password
        .as_deref()
        .map(|p| is_internal_peer(&headers, p))
        .unwrap_or(false);

    ws.on_upgrade(move |socket| async move {
        ConnectionMultiplexer::run(
            socket,
            internal,
            state.health,
            state.upstream,
            state.model,
            state.input_timeout,
            state.output_timeout,
        )
        .await;
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_matches_exact_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret"),
        );
        assert!(bearer_matches(&headers, "secret"));
        assert!(!bearer_matches(&headers, "other"));
    }

    #[test]
    fn peer_header_marks_internal_only_with_password_configured() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Ttsfleet-Peer", HeaderValue::from_static("secret"));
        assert!(is_internal_peer(&headers, "secret"));
        assert!(!is_internal_peer(&headers, ""));
        assert!(!is_internal_peer(&HeaderMap::new(), "secret"));
    }
}
