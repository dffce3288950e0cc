//! Narrow request interface consumed by the guard.
//!
//! # Responsibilities
//! - Hold exactly what the pipeline reads: method, path, headers, query,
//!   path params, parsed body, peer address, authenticated subject
//! - Build it from a buffered axum request
//! - Generate request IDs
//!
//! # Design Decisions
//! - Bodies are parsed once here; JSON and form bodies become a `Value`,
//!   anything else (multipart uploads) is left to the handler untouched
//! - Header lookups are case-insensitive through `HeaderMap`

use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::Rejection;
use crate::identity::{AuthenticatedSubject, ClientIdentity};
use crate::observability::events::ClientContext;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// UUID v4 request IDs for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request as seen by the guard pipeline.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub raw_query: Option<String>,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub params: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub client_addr: Option<IpAddr>,
    pub subject: Option<String>,
}

impl InboundRequest {
    /// Request for `uri` (path plus optional query string).
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, raw_query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (uri, None),
        };
        Self {
            method,
            path: path.to_string(),
            query: parse_query(raw_query.as_deref()),
            raw_query,
            headers: HeaderMap::new(),
            params: BTreeMap::new(),
            body: None,
            client_addr: None,
            subject: None,
        }
    }

    /// Build from a buffered axum request. Malformed JSON or form bodies are
    /// refused; `verbose` adds the parser message to the rejection.
    pub fn from_parts(
        parts: &Parts,
        body: &Bytes,
        params: BTreeMap<String, String>,
        verbose: bool,
    ) -> Result<Self, Rejection> {
        let raw_query = parts.uri.query().map(str::to_string);
        let body = parse_body(&parts.headers, body)
            .map_err(|e| Rejection::malformed_body(verbose.then_some(e)))?;

        Ok(Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parse_query(raw_query.as_deref()),
            raw_query,
            headers: parts.headers.clone(),
            params,
            body,
            client_addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
            subject: parts
                .extensions
                .get::<AuthenticatedSubject>()
                .map(|AuthenticatedSubject(subject)| subject.clone()),
        })
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_client(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn origin(&self) -> Option<&str> {
        self.header(header::ORIGIN.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Path and raw query, as received.
    pub fn url(&self) -> String {
        match &self.raw_query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Path and percent-decoded query.
    pub fn decoded_url(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }

    pub fn identity(&self) -> ClientIdentity {
        let identity = self
            .client_addr
            .map(ClientIdentity::from_ip)
            .unwrap_or_else(ClientIdentity::unknown);
        match &self.subject {
            Some(subject) => identity.with_subject(subject.clone()),
            None => identity,
        }
    }

    pub fn client_context(&self) -> ClientContext {
        ClientContext::new(self.identity()).with_request(
            self.method.as_str(),
            self.url(),
            self.user_agent(),
        )
    }
}

fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<Option<Value>, String> {
    if body.is_empty() {
        return Ok(None);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("json") {
        serde_json::from_slice(body)
            .map(Some)
            .map_err(|e| e.to_string())
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields: Map<String, Value> = url::form_urlencoded::parse(body)
            .into_owned()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        Ok(Some(Value::Object(fields)))
    } else {
        Ok(None)
    }
}

/// Serialize sanitized query pairs back into a query string.
pub fn encode_query(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde_json::json;

    #[test]
    fn test_new_splits_query() {
        let req = InboundRequest::new(Method::GET, "/api/product/search?q=red%20shoes&page=2");
        assert_eq!(req.path, "/api/product/search");
        assert_eq!(req.query[0], ("q".to_string(), "red shoes".to_string()));
        assert_eq!(req.decoded_url(), "/api/product/search?q=red shoes&page=2");
    }

    #[test]
    fn test_from_parts_reads_peer_and_subject() {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/api/cart/update?x=1")
            .header("content-type", "application/json")
            .header("user-agent", "test-agent")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5555))));
        request
            .extensions_mut()
            .insert(AuthenticatedSubject("auth0|7".into()));
        let (parts, _) = request.into_parts();

        let body = Bytes::from_static(br#"{"itemId":"abc","qty":2}"#);
        let req = InboundRequest::from_parts(&parts, &body, BTreeMap::new(), false).unwrap();

        assert_eq!(req.body, Some(json!({ "itemId": "abc", "qty": 2 })));
        assert_eq!(req.identity().to_string(), "192.0.2.1#auth0|7");
        let ctx = req.client_context();
        assert_eq!(ctx.url, "/api/cart/update?x=1");
        assert_eq!(ctx.user_agent, "test-agent");
    }

    #[test]
    fn test_malformed_json_verbosity() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/api/user/login")
            .header("content-type", "application/json")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        let body = Bytes::from_static(b"{not json");

        let terse = InboundRequest::from_parts(&parts, &body, BTreeMap::new(), false).unwrap_err();
        assert!(terse.body.get("error").is_none());

        let verbose = InboundRequest::from_parts(&parts, &body, BTreeMap::new(), true).unwrap_err();
        assert!(verbose.body["error"].is_string());
    }

    #[test]
    fn test_form_body_and_query_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let body = parse_body(&headers, &Bytes::from_static(b"name=a%26b&city=Rome")).unwrap();
        assert_eq!(body, Some(json!({ "name": "a&b", "city": "Rome" })));

        let pairs = vec![("q".to_string(), "a b&c".to_string())];
        assert_eq!(encode_query(&pairs), "q=a+b%26c");
    }
}
