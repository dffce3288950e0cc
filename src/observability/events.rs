//! Security event log and suspicion aggregation.
//!
//! Every guard component reports through [`SecurityEventLog::record`]. An
//! event is mirrored to `tracing`, counted in metrics and queued for the
//! durable sink. Alert and threat events are additionally kept in a bounded
//! per-identity ring buffer. Scoring counts only the ring's policy
//! violations (see [`EventType::scores`]):
//!
//! ```text
//! Normal --(>= threshold scored events in window)--> Suspicious
//! Suspicious --(clear() or restart)--> Normal
//! ```
//!
//! There is no time-based decay out of `Suspicious`.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::MonitoringConfig;
use crate::identity::ClientIdentity;
use crate::observability::metrics;
use crate::observability::sink::{EventSink, LogCategory};
use crate::security::rate_limit::describe_window;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Alert,
    Threat,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Alert => "alert",
            Severity::Threat => "threat",
        }
    }
}

/// Durable log family an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Application,
    Security,
    Audit,
}

impl From<EventCategory> for LogCategory {
    fn from(category: EventCategory) -> Self {
        match category {
            EventCategory::Application => LogCategory::App,
            EventCategory::Security => LogCategory::Security,
            EventCategory::Audit => LogCategory::Audit,
        }
    }
}

/// Kind of security event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    InjectionAttempt,
    AuthenticationFailure,
    SuspiciousRequest,
    RateLimitExceeded,
    OperatorKeyDropped,
    OperatorRedacted,
    SanitizationFailure,
    SsrfBlocked,
    UrlValidated,
    OriginMissing,
    SuspiciousPatternDetected,
    SuspiciousOrigin,
    SensitiveEndpointAccess,
    SensitiveEndpointResponse,
    ErrorResponse,
    SuspiciousClientDetected,
    SuspiciousClientBlocked,
    /// Host-defined event (auth and audit actions).
    Custom(String),
}

impl EventType {
    /// Host-defined event type. An empty name is replaced so that every event
    /// carries a non-empty type.
    pub fn custom(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            EventType::Custom("unspecified".to_string())
        } else {
            EventType::Custom(name)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::InjectionAttempt => "injection_attempt",
            EventType::AuthenticationFailure => "authentication_failure",
            EventType::SuspiciousRequest => "suspicious_request",
            EventType::RateLimitExceeded => "rate_limit_exceeded",
            EventType::OperatorKeyDropped => "operator_key_dropped",
            EventType::OperatorRedacted => "operator_redacted",
            EventType::SanitizationFailure => "sanitization_failure",
            EventType::SsrfBlocked => "ssrf_blocked",
            EventType::UrlValidated => "url_validated",
            EventType::OriginMissing => "origin_missing",
            EventType::SuspiciousPatternDetected => "suspicious_pattern_detected",
            EventType::SuspiciousOrigin => "suspicious_origin",
            EventType::SensitiveEndpointAccess => "sensitive_endpoint_access",
            EventType::SensitiveEndpointResponse => "sensitive_endpoint_response",
            EventType::ErrorResponse => "error_response",
            EventType::SuspiciousClientDetected => "suspicious_client_detected",
            EventType::SuspiciousClientBlocked => "suspicious_client_blocked",
            EventType::Custom(name) => name,
        }
    }

    /// Whether the event counts towards suspicion. Only policy violations
    /// attributable to the client score: advisory detections, error
    /// responses, the guard's own block and the detection alert do not.
    /// Host-defined events score whenever they are retained, which for
    /// auth events means failures and blocks.
    pub fn scores(&self) -> bool {
        matches!(
            self,
            EventType::InjectionAttempt
                | EventType::AuthenticationFailure
                | EventType::RateLimitExceeded
                | EventType::OperatorKeyDropped
                | EventType::OperatorRedacted
                | EventType::SsrfBlocked
                | EventType::Custom(_)
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Who made the request an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    #[serde(rename = "client")]
    pub identity: ClientIdentity,
    pub method: String,
    pub url: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            method: "unknown".to_string(),
            url: "unknown".to_string(),
            user_agent: "unknown".to_string(),
        }
    }

    /// Context for checks the server runs on its own behalf.
    pub fn internal() -> Self {
        Self::new(ClientIdentity::internal())
    }

    pub fn with_request(
        mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        user_agent: Option<&str>,
    ) -> Self {
        self.method = method.into();
        self.url = url.into();
        if let Some(agent) = user_agent.filter(|a| !a.is_empty()) {
            self.user_agent = agent.to_string();
        }
        self
    }
}

/// One immutable security event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_type: EventType,
    pub severity: Severity,
    pub category: EventCategory,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub client: ClientContext,
    pub detail: Value,
    #[serde(skip)]
    observed_at: Instant,
}

/// Suspicion scoring parameters.
#[derive(Debug, Clone, Copy)]
pub struct EventLogSettings {
    pub suspicion_threshold: usize,
    pub suspicion_window: Duration,
    pub ring_capacity: usize,
}

impl Default for EventLogSettings {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

impl From<&MonitoringConfig> for EventLogSettings {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            suspicion_threshold: config.suspicion_threshold,
            suspicion_window: config.suspicion_window(),
            ring_capacity: config.ring_capacity,
        }
    }
}

/// Aggregate view returned by the admin stats endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub total_suspicious_clients: usize,
    pub suspicious_clients: Vec<String>,
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
}

/// Append-only event log with per-identity suspicion tracking.
#[derive(Debug)]
pub struct SecurityEventLog {
    rings: DashMap<ClientIdentity, VecDeque<SecurityEvent>>,
    suspicious: DashMap<ClientIdentity, DateTime<Utc>>,
    sink: Option<EventSink>,
    clock: Arc<dyn Clock>,
    settings: EventLogSettings,
}

impl SecurityEventLog {
    pub fn new(settings: EventLogSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            rings: DashMap::new(),
            suspicious: DashMap::new(),
            sink: None,
            clock,
            settings,
        }
    }

    /// Also persist events through `sink`.
    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record an event. Never fails; persistence is best-effort.
    pub fn record(
        &self,
        event_type: EventType,
        severity: Severity,
        detail: Value,
        client: &ClientContext,
    ) {
        let category = match severity {
            Severity::Info => EventCategory::Application,
            Severity::Alert | Severity::Threat => EventCategory::Security,
        };
        let event = self.build(event_type, severity, category, detail, client);
        self.emit(&event);

        if severity == Severity::Info {
            return;
        }
        self.retain_and_score(event);
    }

    pub fn info(&self, event_type: EventType, detail: Value, client: &ClientContext) {
        self.record(event_type, Severity::Info, detail, client);
    }

    pub fn alert(&self, event_type: EventType, detail: Value, client: &ClientContext) {
        self.record(event_type, Severity::Alert, detail, client);
    }

    pub fn threat(&self, event_type: EventType, detail: Value, client: &ClientContext) {
        self.record(event_type, Severity::Threat, detail, client);
    }

    /// Authentication activity. Kinds mentioning a failure or block are
    /// alerts (and so count towards suspicion); everything else is info.
    pub fn record_auth_event(&self, kind: &str, detail: Value, client: &ClientContext) {
        let lowered = kind.to_ascii_lowercase();
        let severity = if lowered.contains("failed") || lowered.contains("blocked") {
            Severity::Alert
        } else {
            Severity::Info
        };
        self.record(EventType::custom(kind), severity, detail, client);
    }

    /// Audit trail entry. Goes to the audit log only; never scored.
    pub fn record_audit(&self, action: &str, detail: Value, client: &ClientContext) {
        let event = self.build(
            EventType::custom(action),
            Severity::Info,
            EventCategory::Audit,
            detail,
            client,
        );
        self.emit(&event);
    }

    pub fn is_suspicious(&self, identity: &ClientIdentity) -> bool {
        self.suspicious.contains_key(identity)
    }

    /// Suspicious identities, sorted.
    pub fn suspicious_clients(&self) -> Vec<ClientIdentity> {
        let mut clients: Vec<_> = self.suspicious.iter().map(|e| e.key().clone()).collect();
        clients.sort();
        clients
    }

    /// Retained events for one identity, oldest first.
    pub fn recent_events(&self, identity: &ClientIdentity) -> Vec<SecurityEvent> {
        self.rings
            .get(identity)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SecurityStats {
        let suspicious_clients: Vec<String> = self
            .suspicious_clients()
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut total_events = 0;
        let mut events_by_type = BTreeMap::new();
        for ring in self.rings.iter() {
            total_events += ring.len();
            for event in ring.iter() {
                *events_by_type
                    .entry(event.event_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        SecurityStats {
            total_suspicious_clients: suspicious_clients.len(),
            suspicious_clients,
            total_events,
            events_by_type,
        }
    }

    /// Wipe in-memory events and the suspicious set. Durable files are not
    /// touched. Returns the number of events dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.rings.iter().map(|ring| ring.len()).sum();
        self.rings.clear();
        self.suspicious.clear();
        metrics::record_suspicious_clients(0);
        dropped
    }

    fn build(
        &self,
        event_type: EventType,
        severity: Severity,
        category: EventCategory,
        detail: Value,
        client: &ClientContext,
    ) -> SecurityEvent {
        SecurityEvent {
            event_type,
            severity,
            category,
            timestamp: Utc::now(),
            client: client.clone(),
            detail,
            observed_at: self.clock.now(),
        }
    }

    fn emit(&self, event: &SecurityEvent) {
        let event_type = event.event_type.as_str();
        let client = &event.client;
        match event.severity {
            Severity::Info => tracing::info!(
                event_type,
                category = ?event.category,
                client = %client.identity,
                method = %client.method,
                url = %client.url,
                detail = %event.detail,
                "Security event"
            ),
            Severity::Alert => tracing::warn!(
                event_type,
                client = %client.identity,
                method = %client.method,
                url = %client.url,
                user_agent = %client.user_agent,
                detail = %event.detail,
                "Security alert"
            ),
            Severity::Threat => tracing::error!(
                event_type,
                client = %client.identity,
                method = %client.method,
                url = %client.url,
                user_agent = %client.user_agent,
                detail = %event.detail,
                "Security threat"
            ),
        }
        metrics::record_security_event(event_type, event.severity.as_str());

        let Some(sink) = &self.sink else {
            return;
        };
        match serde_json::to_string(event) {
            Ok(line) => sink.write(event.category.into(), event.timestamp, line),
            Err(e) => tracing::error!(error = %e, event_type, "Failed to serialize security event"),
        }
    }

    fn retain_and_score(&self, event: SecurityEvent) {
        let identity = event.client.identity.clone();
        let client = event.client.clone();
        let now = self.clock.now();
        let window = self.settings.suspicion_window;
        let scored = event.event_type.scores();

        let recent = {
            let mut ring = self.rings.entry(identity.clone()).or_default();
            push_bounded(&mut ring, event, self.settings.ring_capacity);
            if !scored {
                return;
            }
            ring.iter()
                .filter(|e| e.event_type.scores())
                .filter(|e| now.saturating_duration_since(e.observed_at) < window)
                .count()
        };

        if recent < self.settings.suspicion_threshold {
            return;
        }
        let newly_flagged = match self.suspicious.entry(identity.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            }
            Entry::Occupied(_) => false,
        };
        if !newly_flagged {
            return;
        }

        metrics::record_suspicious_clients(self.suspicious.len());
        let detected = self.build(
            EventType::SuspiciousClientDetected,
            Severity::Alert,
            EventCategory::Security,
            json!({
                "eventCount": recent,
                "timeWindow": describe_window(window),
            }),
            &client,
        );
        self.emit(&detected);
        if let Some(mut ring) = self.rings.get_mut(&identity) {
            push_bounded(&mut ring, detected, self.settings.ring_capacity);
        }
    }
}

/// Append `event`, evicting the oldest unscored event first so that
/// advisory noise cannot push scored events out of the ring.
fn push_bounded(ring: &mut VecDeque<SecurityEvent>, event: SecurityEvent, capacity: usize) {
    ring.push_back(event);
    while ring.len() > capacity.max(1) {
        match ring.iter().position(|e| !e.event_type.scores()) {
            Some(index) => ring.remove(index),
            None => ring.pop_front(),
        };
    }
}
