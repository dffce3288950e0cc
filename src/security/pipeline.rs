//! The ordered guard chain.
//!
//! [`RequestPipeline::process`] runs every stage against an
//! [`InboundRequest`] and returns either an [`Admission`] carrying the
//! sanitized input, or a [`Refusal`] carrying the rejection to send. Both
//! hold a [`CompletionToken`] that the host must hand back to
//! [`RequestPipeline::complete`] once the response status is known.
//!
//! Stage order:
//! 1. monitoring (advisory)
//! 2. sanitization
//! 3. request-line validation (400)
//! 4. suspicious identity block (403, when enabled)
//! 5. rate limits, general then endpoint class (429), and throttle delay
//! 6. origin check on callback paths (400)
//! 7. outbound URL parameters (400)

use serde_json::json;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::Rejection;
use crate::http::request::InboundRequest;
use crate::identity::ClientIdentity;
use crate::observability::events::{ClientContext, EventLogSettings, EventType, SecurityEventLog};
use crate::observability::metrics;
use crate::observability::sink::EventSink;
use crate::security::monitoring::{MonitorSettings, RequestMonitor, RequestTicket, ResponseOutcome};
use crate::security::rate_limit::{PolicyClass, Quota, RateLimitDecision, RateLimiterSet};
use crate::security::sanitizer::{SanitizedInput, Sanitizer};
use crate::security::ssrf::UrlGuard;
use crate::security::throttle::{SpeedThrottle, ThrottleSettings, ThrottleTicket};

/// Outcome of running the chain.
#[derive(Debug)]
pub enum Decision {
    Continue(Admission),
    Reject(Refusal),
}

impl Decision {
    pub fn is_continue(&self) -> bool {
        matches!(self, Decision::Continue(_))
    }

    pub fn token(&self) -> &CompletionToken {
        match self {
            Decision::Continue(admission) => &admission.token,
            Decision::Reject(refusal) => &refusal.token,
        }
    }
}

/// Request admitted to the handler.
#[derive(Debug)]
pub struct Admission {
    pub input: SanitizedInput,
    /// Throttle delay to apply before the handler runs.
    pub delay: Duration,
    /// Admitting quota with the fewest remaining requests, for RateLimit-*
    /// headers.
    pub quota: Option<Quota>,
    pub token: CompletionToken,
}

/// Request refused by a stage.
#[derive(Debug)]
pub struct Refusal {
    pub rejection: Rejection,
    pub token: CompletionToken,
}

/// State the response hook needs.
#[derive(Debug)]
pub struct CompletionToken {
    ticket: RequestTicket,
    quotas: Vec<(PolicyClass, Quota)>,
    throttle: Option<ThrottleTicket>,
}

impl CompletionToken {
    pub fn client(&self) -> &ClientContext {
        self.ticket.client()
    }
}

#[derive(Debug)]
pub struct RequestPipeline {
    events: Arc<SecurityEventLog>,
    sanitizer: Sanitizer,
    url_guard: Arc<UrlGuard>,
    limiters: RateLimiterSet,
    throttle: SpeedThrottle,
    monitor: RequestMonitor,
    trusted_ips: HashSet<IpAddr>,
    block_suspicious: bool,
}

impl RequestPipeline {
    /// Pipeline with an in-memory event log only.
    pub fn new(config: &GuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self::from_config(config, clock, None)
    }

    /// Pipeline whose event log also writes to `sink`.
    pub fn from_config(config: &GuardConfig, clock: Arc<dyn Clock>, sink: Option<EventSink>) -> Self {
        let mut events = SecurityEventLog::new(EventLogSettings::from(&config.monitoring), clock.clone());
        if let Some(sink) = sink {
            events = events.with_sink(sink);
        }
        let events = Arc::new(events);

        let trusted_ips = config
            .security
            .trusted_ips
            .iter()
            .filter_map(|ip| match ip.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(ip = %ip, "Ignoring invalid trusted IP");
                    None
                }
            })
            .collect();

        Self {
            sanitizer: Sanitizer::new(events.clone()),
            url_guard: Arc::new(UrlGuard::from_config(config, events.clone())),
            limiters: RateLimiterSet::new(clock.clone(), events.clone()),
            throttle: SpeedThrottle::new(ThrottleSettings::from(&config.throttle), clock.clone()),
            monitor: RequestMonitor::new(
                MonitorSettings::from(&config.monitoring),
                events.clone(),
                clock,
            ),
            trusted_ips,
            block_suspicious: config.block_suspicious(),
            events,
        }
    }

    pub fn events(&self) -> &Arc<SecurityEventLog> {
        &self.events
    }

    pub fn url_guard(&self) -> &Arc<UrlGuard> {
        &self.url_guard
    }

    /// Run every stage for a request routed to `class`.
    pub fn process(&self, req: &InboundRequest, class: PolicyClass) -> Decision {
        let client = req.client_context();
        let ticket = self.monitor.observe_request(req, &client);
        let mut token = CompletionToken {
            ticket,
            quotas: Vec::new(),
            throttle: None,
        };

        let input = self
            .sanitizer
            .sanitize(req.body.as_ref(), &req.query, &req.params, &client);

        if let Err(rejection) = self.monitor.validate_request(req, &client) {
            return refuse("invalid_request", rejection, token);
        }

        if self.block_suspicious && self.events.is_suspicious(&client.identity) {
            self.events.alert(
                EventType::SuspiciousClientBlocked,
                json!({ "path": req.path }),
                &client,
            );
            return refuse("suspicious_blocked", Rejection::suspicious_client(), token);
        }

        let mut quota: Option<Quota> = None;
        if !self.is_trusted(&client.identity) {
            let mut classes = vec![PolicyClass::General];
            if class != PolicyClass::General {
                classes.push(class);
            }
            for class in classes {
                let Some(limiter) = self.limiters.get(class) else {
                    continue;
                };
                match limiter.check(&client) {
                    RateLimitDecision::Allowed(q) => {
                        token.quotas.push((class, q));
                        match quota {
                            Some(tightest) if tightest.remaining <= q.remaining => {}
                            _ => quota = Some(q),
                        }
                    }
                    RateLimitDecision::Denied(exceeded) => {
                        return refuse("rate_limited", Rejection::rate_limited(&exceeded), token);
                    }
                }
            }
            token.throttle = Some(self.throttle.register(&client.identity));
        }

        if self.url_guard.requires_origin_check(&req.path) {
            if let Some(origin) = req.origin() {
                let result = self.url_guard.validate_origin(Some(origin), &client);
                if let Some(reason) = result.reason {
                    return refuse("invalid_origin", Rejection::invalid_origin(reason.as_str()), token);
                }
            }
        }

        if let Err(violation) =
            self.url_guard
                .validate_url_parameters(&input.query, input.body.as_ref(), &client)
        {
            tracing::warn!(
                client = %client.identity,
                parameter = violation.parameter,
                location = violation.location,
                reason = %violation.reason,
                "Rejected outbound URL parameter"
            );
            return refuse(
                "invalid_url_parameter",
                Rejection::invalid_url_parameter(violation.parameter),
                token,
            );
        }

        metrics::record_decision("continue");
        Decision::Continue(Admission {
            input,
            delay: token.throttle.map(|t| t.delay).unwrap_or_default(),
            quota,
            token,
        })
    }

    /// Response hook. Must be called once per processed request, admitted
    /// or refused.
    pub fn complete(&self, token: CompletionToken, outcome: ResponseOutcome) {
        let identity = &token.ticket.client().identity;
        let success = outcome.is_success();
        for (class, quota) in &token.quotas {
            if let Some(limiter) = self.limiters.get(*class) {
                limiter.record_outcome(identity, quota, success);
            }
        }
        if let Some(throttle) = &token.throttle {
            self.throttle.record_outcome(identity, throttle, success);
        }
        self.monitor.observe_response(&token.ticket, outcome);
    }

    /// Drop expired rate-limit and throttle windows.
    pub fn purge_expired(&self) -> usize {
        self.limiters.purge_expired() + self.throttle.purge_expired()
    }

    fn is_trusted(&self, identity: &ClientIdentity) -> bool {
        identity
            .address()
            .parse::<IpAddr>()
            .is_ok_and(|ip| self.trusted_ips.contains(&ip))
    }
}

fn refuse(outcome: &'static str, rejection: Rejection, token: CompletionToken) -> Decision {
    metrics::record_decision(outcome);
    Decision::Reject(Refusal { rejection, token })
}
