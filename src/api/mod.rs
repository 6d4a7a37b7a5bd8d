pub mod control;
pub mod error;
pub mod health;

use axum::{
    http::StatusCode,
    routing::{get, put},
    Router,
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::Config, controller::AppState};

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/status", get(control::get_status))
        .route("/mode", put(control::set_mode))
        .route("/valve", put(control::set_valve))
        .with_state(state)
        .layer(timeout_layer(cfg))
        .layer(TraceLayer::new_for_http())
}

/// Requests still running after `request_timeout_secs` get a 408.
fn timeout_layer(cfg: &Config) -> TimeoutLayer {
    TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(cfg.server.request_timeout_secs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{parse_valve_command, InMemoryBus, MessageBus, Topics};
    use crate::controller::ControlPanel;
    use crate::domain::{ControlMode, ValveCell};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use parking_lot::RwLock;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(bus: Arc<InMemoryBus>) -> AppState {
        let cfg = Config::default();
        AppState {
            panel: Arc::new(ControlPanel::new(bus, cfg.bus.topics.command.clone(), None)),
            cfg: Arc::new(cfg),
            valve: ValveCell::new(12),
            status: Arc::new(RwLock::new(None)),
        }
    }

    fn put_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let mut cfg = Config::default();
        cfg.server.request_timeout_secs = 1;
        let app: Router = Router::new()
            .route("/stuck", get(|| std::future::pending::<()>()))
            .layer(timeout_layer(&cfg));

        let resp = app
            .oneshot(Request::get("/stuck").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state(Arc::new(InMemoryBus::default())), &Config::default());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["simulation_running"], false);
    }

    #[tokio::test]
    async fn test_status_reports_valve() {
        let app = router(state(Arc::new(InMemoryBus::default())), &Config::default());
        let resp = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["mode"], "auto");
        assert_eq!(body["valve_position"], 12);
        assert!(body["last_tick"].is_null());
    }

    #[tokio::test]
    async fn test_put_mode() {
        let st = state(Arc::new(InMemoryBus::default()));
        let app = router(st.clone(), &Config::default());

        let resp = app
            .clone()
            .oneshot(put_json("/mode", r#"{"mode": "MANUAL"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(st.panel.mode(), ControlMode::Manual);

        let resp = app
            .oneshot(put_json("/mode", r#"{"mode": "eco"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "BadRequest");
    }

    #[tokio::test]
    async fn test_put_valve_publishes_command() {
        let bus = Arc::new(InMemoryBus::default());
        let mut rx = bus
            .subscribe(&Topics::default().command_filter)
            .await
            .unwrap();
        let app = router(state(bus), &Config::default());

        let resp = app
            .oneshot(put_json("/valve", r#"{"valve_position": 64.7}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["valve_position"], 65);
        assert_eq!(parse_valve_command(&rx.recv().await.unwrap().payload), Ok(65));
    }

    #[tokio::test]
    async fn test_put_valve_rejects_non_numeric() {
        let app = router(state(Arc::new(InMemoryBus::default())), &Config::default());
        let resp = app
            .oneshot(put_json("/valve", r#"{"valve_position": "open"}"#))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }
}
