//! End-to-end scenarios through the framework-agnostic pipeline.

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use storefront_guard::clock::MockClock;
use storefront_guard::config::Profile;
use storefront_guard::identity::ClientIdentity;
use storefront_guard::observability::{ClientContext, EventLogSettings, EventType, SecurityEventLog};
use storefront_guard::http::InboundRequest;
use storefront_guard::security::rate_limit::PolicyClass;
use storefront_guard::security::ssrf::{UrlGuard, UrlRejectReason};
use storefront_guard::{Decision, GuardConfig, RequestPipeline};

fn pipeline() -> (Arc<RequestPipeline>, MockClock) {
    let clock = MockClock::default();
    let pipeline = RequestPipeline::new(&GuardConfig::default(), Arc::new(clock.clone()));
    (Arc::new(pipeline), clock)
}

fn url_guard(profile: Profile) -> UrlGuard {
    let config = GuardConfig {
        profile,
        ..GuardConfig::default()
    };
    let events = Arc::new(SecurityEventLog::new(
        EventLogSettings::default(),
        Arc::new(MockClock::default()),
    ));
    UrlGuard::from_config(&config, events)
}

#[test]
fn operator_keys_and_script_tags_removed() {
    let (pipeline, _) = pipeline();
    let req = InboundRequest::new(Method::POST, "/api/user/register")
        .with_client("203.0.113.1".parse().unwrap())
        .with_header("content-type", "application/json")
        .with_body(json!({ "$where": "1==1", "name": "<script>alert(1)</script>" }));

    let Decision::Continue(admission) = pipeline.process(&req, PolicyClass::Register) else {
        panic!("request should be admitted");
    };
    let body = admission.input.body.unwrap();
    assert!(body.get("$where").is_none());
    assert!(!body["name"].as_str().unwrap().contains("<script"));

    let recorded: Vec<_> = pipeline
        .events()
        .recent_events(&ClientIdentity::new("203.0.113.1"))
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(recorded.contains(&EventType::OperatorKeyDropped));
}

#[test]
fn sixth_login_is_rate_limited() {
    let (pipeline, clock) = pipeline();
    let login = || {
        InboundRequest::new(Method::POST, "/api/user/login").with_client("203.0.113.2".parse().unwrap())
    };

    for _ in 0..5 {
        assert!(pipeline.process(&login(), PolicyClass::Auth).is_continue());
    }
    let Decision::Reject(refusal) = pipeline.process(&login(), PolicyClass::Auth) else {
        panic!("sixth login should be refused");
    };
    assert_eq!(refusal.rejection.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(refusal.rejection.body["details"]["limit"], 5);
    assert!(refusal.rejection.body["details"]["retryAfter"].as_u64().unwrap() > 0);
    assert!(refusal.rejection.headers.contains_key("retry-after"));

    clock.advance(Duration::from_secs(15 * 60));
    assert!(pipeline.process(&login(), PolicyClass::Auth).is_continue());
}

#[test]
fn metadata_endpoint_blocked_in_production() {
    let guard = url_guard(Profile::Production);
    let result = guard.validate("http://169.254.169.254/latest/meta-data/", "scenario");

    assert!(!result.valid);
    assert_eq!(result.reason, Some(UrlRejectReason::DomainNotWhitelisted));
    assert_eq!(result.sanitized, None);
}

#[test]
fn stripe_allowed_in_both_profiles() {
    for profile in [Profile::Development, Profile::Production] {
        let guard = url_guard(profile);
        let url = "https://api.stripe.com/v1/payment_intents";
        let first = guard.validate(url, "stripe");
        let second = guard.validate(url, "stripe");

        assert!(first.valid, "{profile:?}");
        assert_eq!(first.sanitized.as_deref(), Some(url));
        assert_eq!(first, second);
    }
}

#[test]
fn ten_events_mark_client_suspicious() {
    let clock = MockClock::default();
    let log = SecurityEventLog::new(EventLogSettings::default(), Arc::new(clock.clone()));
    let client = ClientContext::new(ClientIdentity::new("203.0.113.3"));

    for _ in 0..9 {
        log.alert(EventType::SsrfBlocked, json!({}), &client);
        clock.advance(Duration::from_secs(30));
    }
    assert!(log.stats().suspicious_clients.is_empty());

    log.threat(EventType::InjectionAttempt, json!({}), &client);
    let stats = log.stats();
    assert_eq!(stats.suspicious_clients, vec!["203.0.113.3".to_string()]);
    assert_eq!(stats.total_suspicious_clients, 1);
}

#[test]
fn events_outside_window_do_not_count() {
    let clock = MockClock::default();
    let log = SecurityEventLog::new(EventLogSettings::default(), Arc::new(clock.clone()));
    let client = ClientContext::new(ClientIdentity::new("203.0.113.4"));

    for _ in 0..9 {
        log.threat(EventType::InjectionAttempt, json!({}), &client);
    }
    clock.advance(Duration::from_secs(16 * 60));
    log.threat(EventType::InjectionAttempt, json!({}), &client);

    assert!(!log.is_suspicious(&client.identity));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logins_admit_exactly_the_limit() {
    let (pipeline, _) = pipeline();

    let tasks: Vec<_> = (0..40)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let req = InboundRequest::new(Method::POST, "/api/seller/login")
                    .with_client("203.0.113.5".parse().unwrap());
                pipeline.process(&req, PolicyClass::Auth).is_continue()
            })
        })
        .collect();

    let mut allowed = 0;
    for task in tasks {
        if task.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 5);
}
