//! Request monitoring.
//!
//! Advisory checks log and let the request through:
//! - sensitive endpoint access
//! - suspicious patterns anywhere in `{url, query, body}`
//! - anomalies (scanner user agents, oversized Content-Length)
//! - POST requests from an unexpected origin
//!
//! The blocking check matches the request URL against the validation table
//! and rejects on a hit.
//!
//! Response-side logging is an explicit hook: the host calls
//! [`RequestMonitor::observe_response`] with the final status and size once
//! the handler is done.

use axum::http::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::MonitoringConfig;
use crate::error::Rejection;
use crate::http::request::InboundRequest;
use crate::observability::events::{ClientContext, EventType, SecurityEventLog};
use crate::security::patterns::{find_all, first_match, MONITORING_REGEX, VALIDATION_REGEX};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub sensitive_endpoints: Vec<String>,
    pub suspicious_user_agents: Vec<String>,
    pub max_content_length: u64,
    pub trusted_origin: String,
}

impl From<&MonitoringConfig> for MonitorSettings {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            sensitive_endpoints: config.sensitive_endpoints.clone(),
            suspicious_user_agents: config
                .suspicious_user_agents
                .iter()
                .map(|agent| agent.to_ascii_lowercase())
                .collect(),
            max_content_length: config.max_content_length,
            trusted_origin: config.trusted_origin.clone(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

/// Carries request-side observations to the response hook.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    client: ClientContext,
    sensitive: bool,
    started: Instant,
}

impl RequestTicket {
    pub fn client(&self) -> &ClientContext {
        &self.client
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }
}

/// What the handler produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub status: u16,
    pub size: Option<u64>,
}

impl ResponseOutcome {
    pub fn new(status: u16, size: Option<u64>) -> Self {
        Self { status, size }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[derive(Debug)]
pub struct RequestMonitor {
    settings: MonitorSettings,
    events: Arc<SecurityEventLog>,
    clock: Arc<dyn Clock>,
}

impl RequestMonitor {
    pub fn new(settings: MonitorSettings, events: Arc<SecurityEventLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            events,
            clock,
        }
    }

    /// Run the advisory request-side checks.
    pub fn observe_request(&self, req: &InboundRequest, client: &ClientContext) -> RequestTicket {
        let sensitive = self
            .settings
            .sensitive_endpoints
            .iter()
            .any(|endpoint| req.path.starts_with(endpoint.as_str()));

        if sensitive {
            self.events.info(
                EventType::SensitiveEndpointAccess,
                json!({
                    "endpoint": req.path,
                    "contentType": req.header("content-type"),
                    "authorization": if req.header("authorization").is_some() { "present" } else { "absent" },
                    "origin": req.origin(),
                    "referer": req.header("referer"),
                }),
                client,
            );
        }

        self.scan_patterns(req, client);
        self.detect_anomalies(req, client);

        RequestTicket {
            client: client.clone(),
            sensitive,
            started: self.clock.now(),
        }
    }

    /// Blocking URL validation plus the POST origin advisory.
    pub fn validate_request(&self, req: &InboundRequest, client: &ClientContext) -> Result<(), Rejection> {
        let raw = req.url().to_lowercase();
        let decoded = req.decoded_url().to_lowercase();
        let hit = first_match(&VALIDATION_REGEX, &raw).or_else(|| first_match(&VALIDATION_REGEX, &decoded));

        if let Some(hit) = hit {
            self.events.threat(
                EventType::InjectionAttempt,
                json!({
                    "pattern": hit.name,
                    "category": hit.category.to_string(),
                    "matched": hit.matched,
                    "url": req.url(),
                }),
                client,
            );
            return Err(Rejection::invalid_request());
        }

        if req.method == Method::POST {
            if let Some(origin) = req.origin() {
                if !origin.contains(self.settings.trusted_origin.as_str()) {
                    self.events.alert(
                        EventType::SuspiciousOrigin,
                        json!({ "reason": "Suspicious origin detected", "origin": origin }),
                        client,
                    );
                }
            }
        }
        Ok(())
    }

    /// Response hook: sensitive-endpoint response log and error responses.
    pub fn observe_response(&self, ticket: &RequestTicket, outcome: ResponseOutcome) {
        let elapsed = self.clock.now().saturating_duration_since(ticket.started);
        let response_time = millis(elapsed);

        if ticket.sensitive {
            self.events.info(
                EventType::SensitiveEndpointResponse,
                json!({
                    "statusCode": outcome.status,
                    "responseTime": response_time,
                    "responseSize": outcome.size,
                }),
                &ticket.client,
            );
        }

        if outcome.status >= 400 {
            let server_error = outcome.status >= 500;
            let detail = json!({
                "statusCode": outcome.status,
                "responseTime": response_time,
                "errorType": if server_error { "server_error" } else { "client_error" },
            });
            if server_error {
                self.events.threat(EventType::ErrorResponse, detail, &ticket.client);
            } else {
                self.events.alert(EventType::ErrorResponse, detail, &ticket.client);
            }
        }
    }

    fn scan_patterns(&self, req: &InboundRequest, client: &ClientContext) {
        let query: Map<String, Value> = req
            .query
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();
        let serialized = json!({
            "url": req.url(),
            "query": query,
            "body": req.body,
        })
        .to_string();

        for hit in find_all(&MONITORING_REGEX, &serialized) {
            self.events.alert(
                EventType::SuspiciousPatternDetected,
                json!({
                    "pattern": hit.name,
                    "category": hit.category.to_string(),
                    "matchedContent": hit.matched,
                }),
                client,
            );
        }
    }

    fn detect_anomalies(&self, req: &InboundRequest, client: &ClientContext) {
        let mut anomalies = Vec::new();

        if req
            .content_length()
            .is_some_and(|length| length > self.settings.max_content_length)
        {
            anomalies.push("Large request size");
        }

        let user_agent = req.user_agent().unwrap_or_default().to_ascii_lowercase();
        if self
            .settings
            .suspicious_user_agents
            .iter()
            .any(|agent| user_agent.contains(agent.as_str()))
        {
            anomalies.push("Suspicious user agent");
        }

        if !anomalies.is_empty() {
            self.events.alert(
                EventType::SuspiciousRequest,
                json!({ "anomalies": anomalies, "userAgent": req.user_agent() }),
                client,
            );
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::identity::ClientIdentity;
    use crate::observability::events::{EventLogSettings, Severity};

    fn monitor() -> (RequestMonitor, Arc<SecurityEventLog>, MockClock) {
        let clock = MockClock::default();
        let events = Arc::new(SecurityEventLog::new(
            EventLogSettings::default(),
            Arc::new(clock.clone()),
        ));
        (
            RequestMonitor::new(MonitorSettings::default(), events.clone(), Arc::new(clock.clone())),
            events,
            clock,
        )
    }

    fn client() -> ClientContext {
        ClientContext::new(ClientIdentity::new("192.0.2.10"))
    }

    fn types(events: &SecurityEventLog) -> Vec<EventType> {
        events
            .recent_events(&client().identity)
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[test]
    fn test_injection_in_url_rejected() {
        let (monitor, events, _) = monitor();
        let req = InboundRequest::new(Method::GET, "/api/product/list?q=1%20UNION%20SELECT%20password");

        let rejection = monitor.validate_request(&req, &client()).unwrap_err();

        assert_eq!(rejection.status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(rejection.body["message"], "Invalid request detected");
        let recorded = events.recent_events(&client().identity);
        assert_eq!(recorded[0].event_type, EventType::InjectionAttempt);
        assert_eq!(recorded[0].severity, Severity::Threat);
    }

    #[test]
    fn test_clean_url_passes() {
        let (monitor, events, _) = monitor();
        let req = InboundRequest::new(Method::GET, "/api/product/list?category=shoes&page=2");
        assert!(monitor.validate_request(&req, &client()).is_ok());
        assert!(types(&events).is_empty());
    }

    #[test]
    fn test_patterns_in_body_are_advisory() {
        let (monitor, events, _) = monitor();
        let req = InboundRequest::new(Method::POST, "/api/cart/update")
            .with_body(json!({ "note": "<script>alert(1)</script>" }));

        monitor.observe_request(&req, &client());

        assert!(monitor.validate_request(&req, &client()).is_ok());
        assert!(types(&events).contains(&EventType::SuspiciousPatternDetected));
    }

    #[test]
    fn test_scanner_user_agent_flagged() {
        let (monitor, events, _) = monitor();
        let req = InboundRequest::new(Method::GET, "/")
            .with_header("user-agent", "sqlmap/1.7.2#stable")
            .with_header("content-length", "60000000");

        monitor.observe_request(&req, &client());

        let recorded = events.recent_events(&client().identity);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event_type, EventType::SuspiciousRequest);
        assert_eq!(recorded[0].detail["anomalies"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_foreign_post_origin_is_alert_only() {
        let (monitor, events, _) = monitor();
        let req = InboundRequest::new(Method::POST, "/api/order/cod")
            .with_header("origin", "https://evil.example");

        assert!(monitor.validate_request(&req, &client()).is_ok());
        assert_eq!(types(&events), vec![EventType::SuspiciousOrigin]);
    }

    #[test]
    fn test_response_hook() {
        let (monitor, events, clock) = monitor();
        let req = InboundRequest::new(Method::POST, "/api/user/login");

        let ticket = monitor.observe_request(&req, &client());
        assert!(ticket.is_sensitive());
        clock.advance(Duration::from_millis(25));
        monitor.observe_response(&ticket, ResponseOutcome::new(200, Some(12)));
        assert!(types(&events).is_empty());

        monitor.observe_response(&ticket, ResponseOutcome::new(401, None));
        monitor.observe_response(&ticket, ResponseOutcome::new(502, None));
        let recorded = events.recent_events(&client().identity);
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].severity, Severity::Alert);
        assert_eq!(recorded[1].severity, Severity::Threat);
        assert_eq!(recorded[1].detail["errorType"], "server_error");
    }
}
