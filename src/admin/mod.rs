//! Operator endpoints.
//!
//! All routes sit behind a bearer API key; reads and clears are written to
//! the audit log.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::observability::events::SecurityEventLog;

#[derive(Clone, Debug)]
pub struct AdminState {
    pub events: Arc<SecurityEventLog>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/security/stats", get(get_security_stats))
        .route("/admin/security/clear", post(clear_security_logs))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::identity::ClientIdentity;
    use crate::observability::events::{ClientContext, EventLogSettings, EventType};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> AdminState {
        AdminState {
            events: Arc::new(SecurityEventLog::new(
                EventLogSettings::default(),
                Arc::new(MockClock::default()),
            )),
            api_key: Arc::from("test-key"),
        }
    }

    fn request(method: &str, uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_key() {
        let state = state();
        let app = setup_admin_router(state.clone());

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/security/stats", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/admin/security/stats", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let failures = state.events.stats().events_by_type;
        assert_eq!(failures.get("admin_auth_failed"), Some(&2));
    }

    #[tokio::test]
    async fn test_stats_then_clear() {
        let state = state();
        let client = ClientContext::new(ClientIdentity::new("192.0.2.50"));
        state.events.alert(EventType::SuspiciousOrigin, json!({}), &client);
        state.events.alert(EventType::SuspiciousOrigin, json!({}), &client);
        let app = setup_admin_router(state.clone());

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/security/stats", Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["stats"]["totalEvents"], 2);
        assert_eq!(body["stats"]["eventsByType"]["suspicious_origin"], 2);

        let response = app
            .oneshot(request("POST", "/admin/security/clear", Some("test-key")))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["clearedEvents"], 2);
        assert_eq!(state.events.stats().total_events, 0);
    }
}
