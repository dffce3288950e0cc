use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::admin::AdminState;
use crate::identity::ClientIdentity;
use crate::observability::events::ClientContext;

/// Admin bearer-key check. Failures are recorded as auth events.
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented.is_some_and(|key| keys_match(key, &state.api_key)) {
        return Ok(next.run(request).await);
    }

    let client = operator_context(&request);
    state.events.record_auth_event(
        "admin_auth_failed",
        json!({
            "path": request.uri().path(),
            "reason": if presented.is_some() { "invalid key" } else { "missing key" },
        }),
        &client,
    );
    Err(StatusCode::UNAUTHORIZED)
}

/// Client context of the operator making an admin call.
pub fn operator_context(request: &Request) -> ClientContext {
    let identity = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| ClientIdentity::from_ip(addr.ip()))
        .unwrap_or_else(ClientIdentity::unknown);
    ClientContext::new(identity).with_request(
        request.method().as_str(),
        request.uri().to_string(),
        request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok()),
    )
}

fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
