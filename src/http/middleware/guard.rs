//! Guard middleware.
//! Runs the request pipeline in front of a route group.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{header, request::Parts, HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Rejection;
use crate::http::request::{encode_query, InboundRequest};
use crate::security::monitoring::ResponseOutcome;
use crate::security::pipeline::{Decision, RequestPipeline};
use crate::security::rate_limit::{PolicyClass, Quota};

/// Per-route-group middleware state.
#[derive(Clone, Debug)]
pub struct GuardState {
    pub pipeline: Arc<RequestPipeline>,
    pub class: PolicyClass,
    /// Include parser errors in 400 bodies.
    pub verbose_errors: bool,
    pub max_body_size: usize,
}

impl GuardState {
    pub fn with_class(&self, class: PolicyClass) -> Self {
        Self {
            class,
            ..self.clone()
        }
    }
}

/// Must be installed with `route_layer` so path params are available.
pub async fn guard_middleware(
    State(state): State<GuardState>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(_) => return Rejection::payload_too_large().into_response(),
    };

    let params: BTreeMap<String, String> = RawPathParams::from_request_parts(&mut parts, &state)
        .await
        .map(|params| {
            params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let inbound = match InboundRequest::from_parts(&parts, &bytes, params, state.verbose_errors) {
        Ok(inbound) => inbound,
        Err(rejection) => return rejection.into_response(),
    };

    match state.pipeline.process(&inbound, state.class) {
        Decision::Reject(refusal) => {
            let response = refusal.rejection.into_response();
            state.pipeline.complete(refusal.token, outcome_of(&response));
            response
        }
        Decision::Continue(admission) => {
            if !admission.delay.is_zero() {
                tokio::time::sleep(admission.delay).await;
            }

            let bytes = match &admission.input.body {
                Some(body) => rewrite_body(&mut parts, body).unwrap_or(bytes),
                None => bytes,
            };
            if inbound.raw_query.is_some() {
                rewrite_query(&mut parts, &admission.input.query);
            }
            parts.extensions.insert(admission.input);

            let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
            state.pipeline.complete(admission.token, outcome_of(&response));

            if let Some(quota) = admission.quota {
                insert_quota_headers(&mut response, &quota);
            }
            response
        }
    }
}

fn outcome_of(response: &Response) -> ResponseOutcome {
    ResponseOutcome::new(response.status().as_u16(), response.body().size_hint().exact())
}

/// Re-encode the sanitized body in the request's content type.
fn rewrite_body(parts: &mut Parts, body: &Value) -> Option<Bytes> {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let bytes = if content_type.contains("json") {
        Bytes::from(serde_json::to_vec(body).ok()?)
    } else {
        let fields = body.as_object()?;
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in fields {
            match value {
                Value::String(s) => form.append_pair(key, s),
                other => form.append_pair(key, &other.to_string()),
            };
        }
        Bytes::from(form.finish())
    };

    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    Some(bytes)
}

fn rewrite_query(parts: &mut Parts, query: &[(String, String)]) {
    let path = parts.uri.path();
    let rebuilt = if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, encode_query(query))
    };
    match rebuilt.parse::<Uri>() {
        Ok(uri) => parts.uri = uri,
        Err(e) => tracing::warn!(error = %e, "Failed to rebuild sanitized query"),
    }
}

fn insert_quota_headers(response: &mut Response, quota: &Quota) {
    let reset = quota.reset_after.as_secs() + u64::from(quota.reset_after.subsec_nanos() > 0);
    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(quota.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(quota.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::GuardConfig;
    use crate::security::sanitizer::SanitizedInput;
    use axum::{
        http::{Method, Request as HttpRequest, StatusCode},
        middleware,
        routing::post,
        Extension, Json, Router,
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn app(class: PolicyClass) -> Router {
        let state = GuardState {
            pipeline: Arc::new(RequestPipeline::new(
                &GuardConfig::default(),
                Arc::new(MockClock::default()),
            )),
            class,
            verbose_errors: true,
            max_body_size: 1024,
        };
        Router::new()
            .route(
                "/api/cart/{item}",
                post(
                    |Extension(input): Extension<SanitizedInput>, Json(body): Json<Value>| async move {
                        Json(json!({ "input": input, "forwarded": body }))
                    },
                ),
            )
            .route_layer(middleware::from_fn_with_state(state, guard_middleware))
    }

    fn post_json(uri: &str, body: Value) -> Request {
        HttpRequest::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_handler_sees_sanitized_request() {
        let response = app(PolicyClass::Cart)
            .oneshot(post_json(
                "/api/cart/sku1?note%5B%24gt%5D=1&color=red",
                json!({ "$set": { "admin": true }, "qty": 2 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-limit"], "50");
        assert_eq!(response.headers()["ratelimit-remaining"], "49");

        let body = json_body(response).await;
        assert_eq!(body["forwarded"], json!({ "qty": 2 }));
        assert_eq!(body["input"]["params"]["item"], "sku1");
        assert_eq!(body["input"]["query"], json!([["color", "red"]]));
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/cart/sku1")
            .header("content-type", "application/json")
            .body(Body::from("{\"qty\":"))
            .unwrap();
        let response = app(PolicyClass::Cart).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["message"], "Invalid request body");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let response = app(PolicyClass::Cart)
            .oneshot(post_json("/api/cart/sku1", json!({ "blob": "x".repeat(4096) })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
