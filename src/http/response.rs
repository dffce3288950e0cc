//! Response handling.
//!
//! # Responsibilities
//! - Render pipeline rejections as JSON responses
//! - Add security headers to every response
//! - Mark account responses as non-cacheable
//!
//! # Design Decisions
//! - Headers set by a handler win over the defaults (`if_not_present`)
//! - Rejection bodies are generic; only body-parse errors carry detail,
//!   and only outside production

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::Rejection;

/// Path prefixes whose responses must never be cached.
pub const NO_STORE_PREFIXES: &[&str] = &["/api/user/", "/api/auth0-user/"];

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(self.body)).into_response()
    }
}

/// Wrap `router` with the security response headers.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(middleware::from_fn(no_store_middleware))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("1; mode=block"),
        ))
}

async fn no_store_middleware(req: Request, next: Next) -> Response {
    let no_store = NO_STORE_PREFIXES
        .iter()
        .any(|prefix| req.uri().path().starts_with(prefix));
    let mut response = next.run(req).await;

    if no_store {
        let headers = response.headers_mut();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        with_security_headers(
            Router::new()
                .route("/api/user/profile", get(|| async { "me" }))
                .route("/api/product/list", get(|| async { "list" })),
        )
    }

    #[tokio::test]
    async fn test_security_headers_everywhere() {
        let response = app()
            .oneshot(HttpRequest::get("/api/product/list").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(response.headers()["x-xss-protection"], "1; mode=block");
        assert!(response.headers().get("cache-control").is_none());
    }

    #[tokio::test]
    async fn test_account_paths_not_cached() {
        let response = app()
            .oneshot(HttpRequest::get("/api/user/profile").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers()["cache-control"]
            .to_str()
            .unwrap()
            .starts_with("no-store"));
        assert_eq!(response.headers()["pragma"], "no-cache");
    }

    #[tokio::test]
    async fn test_rejection_response() {
        let response = Rejection::suspicious_client().into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
    }
}
