//! Fixed-window rate limiting per client identity and endpoint class.
//!
//! Each [`PolicyClass`] has one immutable [`RateLimitPolicy`] and one
//! [`RateLimiter`] owning a counter per identity. The read-compare-increment
//! sequence for a counter runs under its `DashMap` entry lock, so parallel
//! requests from the same identity never lose updates.
//!
//! Denied requests are not counted: a counter saturates at the policy
//! maximum until its window rolls over.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::identity::ClientIdentity;
use crate::observability::events::{ClientContext, EventType, SecurityEventLog};
use crate::observability::metrics;

/// Endpoint classes with their own limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyClass {
    General,
    Auth,
    Register,
    Upload,
    Cart,
    Order,
    Search,
    Profile,
}

impl PolicyClass {
    pub const ALL: [PolicyClass; 8] = [
        PolicyClass::General,
        PolicyClass::Auth,
        PolicyClass::Register,
        PolicyClass::Upload,
        PolicyClass::Cart,
        PolicyClass::Order,
        PolicyClass::Search,
        PolicyClass::Profile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyClass::General => "general",
            PolicyClass::Auth => "auth",
            PolicyClass::Register => "register",
            PolicyClass::Upload => "upload",
            PolicyClass::Cart => "cart",
            PolicyClass::Order => "order",
            PolicyClass::Search => "search",
            PolicyClass::Profile => "profile",
        }
    }

    /// User-facing advice shown with a 429. Not used for control flow.
    pub fn suggestion(self) -> &'static str {
        match self {
            PolicyClass::General => "You are making requests too quickly. Please slow down.",
            PolicyClass::Auth => "Please wait before trying to log in again. Consider using \"Remember Me\" to reduce login frequency.",
            PolicyClass::Register => "Account registration is limited. Please contact support if you need assistance.",
            PolicyClass::Upload => "File uploads are limited to prevent abuse. Please wait before uploading more files.",
            PolicyClass::Cart => "Please slow down when adding items to your cart.",
            PolicyClass::Order => "Order placement is limited to prevent duplicate orders. Please wait before placing another order.",
            PolicyClass::Search => "Please wait a moment before searching again.",
            PolicyClass::Profile => "Profile updates are limited. Please wait before making more changes.",
        }
    }

    /// The fixed policy for this class.
    pub fn policy(self) -> RateLimitPolicy {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        let (window, max_requests, category, message) = match self {
            PolicyClass::General => (
                15 * MINUTE,
                100,
                "API Access",
                "You have exceeded the maximum number of requests allowed. Please wait before making more requests.",
            ),
            PolicyClass::Auth => (
                15 * MINUTE,
                5,
                "Authentication",
                "Too many login attempts detected. Please wait before trying to log in again for security reasons.",
            ),
            PolicyClass::Register => (
                HOUR,
                3,
                "Account Creation",
                "Registration limit exceeded. You can only create a limited number of accounts per hour.",
            ),
            PolicyClass::Upload => (
                HOUR,
                10,
                "File Operations",
                "File upload limit exceeded. You can only upload a limited number of files per hour.",
            ),
            PolicyClass::Cart => (
                15 * MINUTE,
                50,
                "Shopping Cart",
                "You are adding items to your cart too quickly. Please slow down to ensure a smooth shopping experience.",
            ),
            PolicyClass::Order => (
                HOUR,
                5,
                "Order Processing",
                "Order placement limit reached. You can only place a limited number of orders per hour to prevent duplicate orders.",
            ),
            PolicyClass::Search => (
                MINUTE,
                30,
                "Search Operations",
                "Search limit exceeded. Please wait a moment before searching again.",
            ),
            PolicyClass::Profile => (
                HOUR,
                10,
                "Profile Management",
                "Profile update limit exceeded. You can only update your profile a limited number of times per hour.",
            ),
        };

        RateLimitPolicy {
            class: self,
            window: Duration::from_secs(window),
            max_requests,
            // Every class counts successful requests too; repeated successful
            // logins from one source are still worth limiting.
            skip_successful_requests: false,
            category,
            message,
        }
    }
}

/// Immutable limits for one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub class: PolicyClass,
    pub window: Duration,
    pub max_requests: u32,
    /// Give back the slot of a request whose response succeeded.
    pub skip_successful_requests: bool,
    pub category: &'static str,
    pub message: &'static str,
}

/// Machine-readable details of a denial.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub window: String,
    pub retry_after: u64,
    pub retry_after_human: String,
    pub suggestion: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub policy: PolicyClass,
    pub category: &'static str,
    #[serde(skip)]
    pub message: &'static str,
}

/// Remaining allowance after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    window_start: Instant,
}

#[derive(Debug)]
pub enum RateLimitDecision {
    Allowed(Quota),
    Denied(RateLimitExceeded),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Rate limiter for one policy.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    counters: DashMap<ClientIdentity, WindowCounter>,
    clock: Arc<dyn Clock>,
    events: Arc<SecurityEventLog>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>, events: Arc<SecurityEventLog>) -> Self {
        Self {
            policy,
            counters: DashMap::new(),
            clock,
            events,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request from `client` and decide whether it may proceed.
    pub fn check(&self, client: &ClientContext) -> RateLimitDecision {
        let now = self.clock.now();
        let window = self.policy.window;
        let max = self.policy.max_requests;

        let outcome = {
            let mut counter = self
                .counters
                .entry(client.identity.clone())
                .or_insert(WindowCounter {
                    count: 0,
                    window_start: now,
                });
            if now.saturating_duration_since(counter.window_start) >= window {
                counter.count = 0;
                counter.window_start = now;
            }
            let reset_after = window.saturating_sub(now.saturating_duration_since(counter.window_start));

            if counter.count >= max {
                Err(reset_after)
            } else {
                counter.count += 1;
                Ok(Quota {
                    limit: max,
                    remaining: max - counter.count,
                    reset_after,
                    window_start: counter.window_start,
                })
            }
        };

        match outcome {
            Ok(quota) => RateLimitDecision::Allowed(quota),
            Err(reset_after) => RateLimitDecision::Denied(self.deny(client, reset_after)),
        }
    }

    /// Report the response status of an admitted request.
    pub fn record_outcome(&self, identity: &ClientIdentity, quota: &Quota, success: bool) {
        if !(self.policy.skip_successful_requests && success) {
            return;
        }
        if let Some(mut counter) = self.counters.get_mut(identity) {
            if counter.window_start == quota.window_start && counter.count > 0 {
                counter.count -= 1;
            }
        }
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.policy.window;
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.saturating_duration_since(counter.window_start) < window);
        before.saturating_sub(self.counters.len())
    }

    /// Number of identities with a live counter.
    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }

    fn deny(&self, client: &ClientContext, reset_after: Duration) -> RateLimitExceeded {
        let retry_after = ceil_secs(reset_after).max(1);
        let exceeded = RateLimitExceeded {
            limit: self.policy.max_requests,
            window: describe_window(self.policy.window),
            retry_after,
            retry_after_human: humanize_seconds(retry_after),
            suggestion: self.policy.class.suggestion(),
            timestamp: Utc::now(),
            policy: self.policy.class,
            category: self.policy.category,
            message: self.policy.message,
        };

        self.events.alert(
            EventType::RateLimitExceeded,
            json!({
                "policy": self.policy.class.as_str(),
                "category": self.policy.category,
                "limit": exceeded.limit,
                "window": exceeded.window,
                "retryAfter": retry_after,
            }),
            client,
        );
        metrics::record_rate_limited(self.policy.class.as_str());
        exceeded
    }
}

/// One limiter per policy class.
#[derive(Debug)]
pub struct RateLimiterSet {
    limiters: HashMap<PolicyClass, RateLimiter>,
}

impl RateLimiterSet {
    /// Limiters for every class with the fixed policies.
    pub fn new(clock: Arc<dyn Clock>, events: Arc<SecurityEventLog>) -> Self {
        let limiters = PolicyClass::ALL
            .iter()
            .map(|&class| {
                (
                    class,
                    RateLimiter::new(class.policy(), clock.clone(), events.clone()),
                )
            })
            .collect();
        Self { limiters }
    }

    pub fn get(&self, class: PolicyClass) -> Option<&RateLimiter> {
        self.limiters.get(&class)
    }

    pub fn purge_expired(&self) -> usize {
        self.limiters.values().map(RateLimiter::purge_expired).sum()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Window length in words: "15 minutes", "1 hour", "30 seconds".
pub fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (amount, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if amount == 1 {
        format!("1 {unit}")
    } else {
        format!("{amount} {unit}s")
    }
}

/// Short countdown: "1h 0m", "14m 59s", "30s".
pub fn humanize_seconds(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let rest = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {rest}s")
    } else {
        format!("{rest}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::observability::events::EventLogSettings;
    use std::sync::Barrier;

    fn limiter(policy: RateLimitPolicy) -> (RateLimiter, MockClock, Arc<SecurityEventLog>) {
        let clock = MockClock::default();
        let events = Arc::new(SecurityEventLog::new(
            EventLogSettings::default(),
            Arc::new(clock.clone()),
        ));
        (
            RateLimiter::new(policy, Arc::new(clock.clone()), events.clone()),
            clock,
            events,
        )
    }

    fn client(addr: &str) -> ClientContext {
        ClientContext::new(ClientIdentity::new(addr))
    }

    #[test]
    fn test_fixed_policies() {
        let expected = [
            (PolicyClass::General, 15 * 60, 100),
            (PolicyClass::Auth, 15 * 60, 5),
            (PolicyClass::Register, 3600, 3),
            (PolicyClass::Upload, 3600, 10),
            (PolicyClass::Cart, 15 * 60, 50),
            (PolicyClass::Order, 3600, 5),
            (PolicyClass::Search, 60, 30),
            (PolicyClass::Profile, 3600, 10),
        ];
        for (class, secs, max) in expected {
            let policy = class.policy();
            assert_eq!(policy.window, Duration::from_secs(secs), "{class:?}");
            assert_eq!(policy.max_requests, max, "{class:?}");
            assert!(!policy.skip_successful_requests);
        }
    }

    #[test]
    fn test_sixth_auth_attempt_denied_until_window_rolls() {
        let (limiter, clock, events) = limiter(PolicyClass::Auth.policy());
        let c = client("203.0.113.7");

        for i in 0..5 {
            match limiter.check(&c) {
                RateLimitDecision::Allowed(quota) => assert_eq!(quota.remaining, 4 - i),
                RateLimitDecision::Denied(_) => panic!("request {i} denied"),
            }
        }

        clock.advance(Duration::from_secs(60));
        let RateLimitDecision::Denied(exceeded) = limiter.check(&c) else {
            panic!("sixth request allowed");
        };
        assert_eq!(exceeded.limit, 5);
        assert_eq!(exceeded.retry_after, 14 * 60);
        assert_eq!(exceeded.retry_after_human, "14m 0s");
        assert_eq!(exceeded.window, "15 minutes");

        let recorded = events.recent_events(&c.identity);
        assert_eq!(recorded.last().unwrap().event_type, EventType::RateLimitExceeded);

        clock.advance(Duration::from_secs(14 * 60));
        assert!(limiter.check(&c).is_allowed());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _, _) = limiter(PolicyClass::Order.policy());
        for _ in 0..5 {
            assert!(limiter.check(&client("10.0.0.1")).is_allowed());
        }
        assert!(!limiter.check(&client("10.0.0.1")).is_allowed());
        assert!(limiter.check(&client("10.0.0.2")).is_allowed());

        let subject = ClientContext::new(ClientIdentity::new("10.0.0.1").with_subject("u1"));
        assert!(limiter.check(&subject).is_allowed());
    }

    #[test]
    fn test_denials_do_not_extend_the_count() {
        let (limiter, clock, _) = limiter(PolicyClass::Register.policy());
        let c = client("10.0.0.3");
        for _ in 0..20 {
            limiter.check(&c);
        }
        clock.advance(Duration::from_secs(3600));
        match limiter.check(&c) {
            RateLimitDecision::Allowed(quota) => assert_eq!(quota.remaining, 2),
            RateLimitDecision::Denied(_) => panic!("window did not reset"),
        }
    }

    #[test]
    fn test_skip_successful_requests_returns_slot() {
        let mut policy = PolicyClass::Search.policy();
        policy.max_requests = 1;
        policy.skip_successful_requests = true;
        let (limiter, _, _) = limiter(policy);
        let c = client("10.0.0.4");

        let RateLimitDecision::Allowed(quota) = limiter.check(&c) else {
            panic!("first request denied");
        };
        limiter.record_outcome(&c.identity, &quota, true);
        let RateLimitDecision::Allowed(quota) = limiter.check(&c) else {
            panic!("slot not returned");
        };
        limiter.record_outcome(&c.identity, &quota, false);
        assert!(!limiter.check(&c).is_allowed());
    }

    #[test]
    fn test_concurrent_same_identity_exact_count() {
        let mut policy = PolicyClass::General.policy();
        policy.max_requests = 10;
        let (limiter, _, _) = limiter(policy);
        let threads = 64;
        let barrier = Barrier::new(threads);
        let c = client("198.51.100.1");

        let allowed: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        usize::from(limiter.check(&c).is_allowed())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 10);
    }

    #[test]
    fn test_purge_expired() {
        let (limiter, clock, _) = limiter(PolicyClass::Search.policy());
        limiter.check(&client("10.0.0.5"));
        clock.advance(Duration::from_secs(30));
        limiter.check(&client("10.0.0.6"));
        clock.advance(Duration::from_secs(31));

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_human_readable_durations() {
        assert_eq!(describe_window(Duration::from_secs(900)), "15 minutes");
        assert_eq!(describe_window(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_window(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_window(Duration::from_secs(7200)), "2 hours");
        assert_eq!(describe_window(Duration::from_secs(45)), "45 seconds");

        assert_eq!(humanize_seconds(899), "14m 59s");
        assert_eq!(humanize_seconds(3600), "1h 0m");
        assert_eq!(humanize_seconds(30), "30s");
    }

    #[test]
    fn test_exceeded_serializes_camel_case() {
        let (limiter, _, _) = limiter(PolicyClass::Auth.policy());
        let c = client("10.0.0.8");
        for _ in 0..5 {
            limiter.check(&c);
        }
        let RateLimitDecision::Denied(exceeded) = limiter.check(&c) else {
            panic!("expected denial");
        };
        let value = serde_json::to_value(&exceeded).unwrap();
        assert_eq!(value["limit"], 5);
        assert_eq!(value["type"], "auth");
        assert_eq!(value["category"], "Authentication");
        assert!(value["retryAfter"].as_u64().unwrap() > 0);
        assert!(value.get("retryAfterHuman").is_some());
        assert!(value.get("message").is_none());
    }
}
