use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .with_state(state)
}

async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: SharedState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("status api listening on http://{addr}/api/status");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StatusSnapshot;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    async fn get_status(state: SharedState) -> (StatusCode, serde_json::Value) {
        let resp = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_before_first_report() {
        let state = Arc::new(RwLock::new(SystemState::new()));
        let (code, json) = get_status(state).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["mqtt_connected"], false);
        assert!(json["snapshot"].is_null());
        assert_eq!(json["irrigation_count"], 0);
        assert_eq!(json["events"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn status_reflects_loop_activity() {
        let state = Arc::new(RwLock::new(SystemState::new()));
        {
            let mut st = state.write().await;
            st.mqtt_connected = true;
            st.record_snapshot(StatusSnapshot {
                light: 420.0,
                accumulated: 0.25,
                trigger_level: 0.5,
            });
            st.record_irrigation(2, "irrigation 2 started".into());
        }
        let (_, json) = get_status(state).await;
        assert_eq!(json["mqtt_connected"], true);
        assert_eq!(json["snapshot"]["light"], 420.0);
        assert_eq!(json["snapshot"]["trigger_level"], 0.5);
        assert_eq!(json["irrigation_count"], 2);
        assert_eq!(json["events"][0]["kind"], "irrigation");
        assert_eq!(json["events"][1]["kind"], "status");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let state = Arc::new(RwLock::new(SystemState::new()));
        let resp = router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
