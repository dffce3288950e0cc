//! Outbound URL (SSRF) filtering.
//!
//! Checks, in order, stopping at the first failure:
//! 1. parse
//! 2. scheme is `http` or `https`
//! 3. (strict mode) no embedded credentials
//! 4. effective port not in [`BLOCKED_PORTS`]
//! 5. host equals or is a subdomain of an allow-list entry
//! 6. host is not private/loopback/link-local, unless the policy allows it
//!
//! The allow-list check runs before the private-network check, so an
//! unlisted metadata address reports "domain not whitelisted".
//!
//! The active [`SsrfPolicy`] sits behind an `ArcSwap` and can be replaced at
//! runtime when the configuration file changes.

use arc_swap::ArcSwap;
use ipnet::IpNet;
use lazy_static::lazy_static;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use url::{Host, Url};

use crate::config::{GuardConfig, SsrfProfileConfig};
use crate::observability::events::{ClientContext, EventType, SecurityEventLog};
use crate::observability::metrics;

/// Ports never reachable through a validated URL.
pub const BLOCKED_PORTS: &[u16] = &[
    22,    // SSH
    23,    // Telnet
    25,    // SMTP
    53,    // DNS
    110,   // POP3
    143,   // IMAP
    993,   // IMAPS
    995,   // POP3S
    1433,  // SQL Server
    3306,  // MySQL
    3389,  // RDP
    5432,  // PostgreSQL
    6379,  // Redis
    27017, // MongoDB
];

/// Request fields that carry URLs the server may later call or redirect to.
pub const SENSITIVE_PARAMETERS: &[&str] = &[
    "url",
    "callback",
    "redirect",
    "endpoint",
    "webhook",
    "return_url",
    "success_url",
    "cancel_url",
];

const PRIVATE_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

lazy_static! {
    static ref PRIVATE_NETWORKS: Vec<IpNet> = PRIVATE_RANGES
        .iter()
        .filter_map(|range| range.parse().ok())
        .collect();
}

/// Whether an address is private, loopback or link-local. IPv4-mapped IPv6
/// addresses are judged by their IPv4 part.
pub fn is_private_ip(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    PRIVATE_NETWORKS.iter().any(|net| net.contains(&ip))
}

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRejectReason {
    Malformed,
    SchemeNotAllowed,
    CredentialsNotAllowed,
    PortNotAllowed,
    DomainNotWhitelisted,
    PrivateNetwork,
    Missing,
}

impl UrlRejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlRejectReason::Malformed => "malformed",
            UrlRejectReason::SchemeNotAllowed => "scheme not allowed",
            UrlRejectReason::CredentialsNotAllowed => "credentials not allowed",
            UrlRejectReason::PortNotAllowed => "port not allowed",
            UrlRejectReason::DomainNotWhitelisted => "domain not whitelisted",
            UrlRejectReason::PrivateNetwork => "private network access not allowed",
            UrlRejectReason::Missing => "missing",
        }
    }
}

impl fmt::Display for UrlRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UrlRejectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of validating one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UrlRejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl UrlValidation {
    fn accepted(url: &str) -> Self {
        Self {
            valid: true,
            reason: None,
            sanitized: Some(url.to_string()),
        }
    }

    fn rejected(reason: UrlRejectReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            sanitized: None,
        }
    }
}

/// A sensitive request parameter that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParameterViolation {
    pub parameter: &'static str,
    pub location: &'static str,
    pub reason: UrlRejectReason,
}

/// Active allow-list and network rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrfPolicy {
    allowed_domains: Vec<String>,
    allow_private_networks: bool,
    strict_mode: bool,
}

impl SsrfPolicy {
    pub fn new(allowed_domains: Vec<String>, allow_private_networks: bool, strict_mode: bool) -> Self {
        Self {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| normalize_host(&d))
                .filter(|d| !d.is_empty())
                .collect(),
            allow_private_networks,
            strict_mode,
        }
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    fn allows_host(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|domain| {
            host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl From<&SsrfProfileConfig> for SsrfPolicy {
    fn from(config: &SsrfProfileConfig) -> Self {
        Self::new(
            config.allowed_domains.clone(),
            config.allow_private_networks,
            config.strict_mode,
        )
    }
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// What the checks learned about a URL, for logging.
struct Evaluation {
    outcome: Result<(), UrlRejectReason>,
    hostname: Option<String>,
    port: Option<u16>,
}

fn evaluate(policy: &SsrfPolicy, raw: &str) -> Evaluation {
    let mut eval = Evaluation {
        outcome: Ok(()),
        hostname: None,
        port: None,
    };
    let fail = |mut eval: Evaluation, reason| {
        eval.outcome = Err(reason);
        eval
    };

    let Ok(url) = Url::parse(raw.trim()) else {
        return fail(eval, UrlRejectReason::Malformed);
    };
    if !matches!(url.scheme(), "http" | "https") {
        return fail(eval, UrlRejectReason::SchemeNotAllowed);
    }
    let Some(host) = url.host() else {
        return fail(eval, UrlRejectReason::Malformed);
    };
    let hostname = match &host {
        Host::Domain(domain) => normalize_host(domain),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };
    eval.hostname = Some(hostname.clone());
    eval.port = url.port_or_known_default();

    if policy.strict_mode && (!url.username().is_empty() || url.password().is_some()) {
        return fail(eval, UrlRejectReason::CredentialsNotAllowed);
    }
    if eval.port.is_some_and(|port| BLOCKED_PORTS.contains(&port)) {
        return fail(eval, UrlRejectReason::PortNotAllowed);
    }
    if !policy.allows_host(&hostname) {
        return fail(eval, UrlRejectReason::DomainNotWhitelisted);
    }

    let private = match host {
        Host::Ipv4(ip) => is_private_ip(IpAddr::V4(ip)),
        Host::Ipv6(ip) => is_private_ip(IpAddr::V6(ip)),
        Host::Domain(_) => hostname == "localhost" || hostname.ends_with(".localhost"),
    };
    if private && !policy.allow_private_networks {
        return fail(eval, UrlRejectReason::PrivateNetwork);
    }
    eval
}

/// URL filter shared by the pipeline and by outbound call sites.
#[derive(Debug)]
pub struct UrlGuard {
    policy: ArcSwap<SsrfPolicy>,
    default_origin: String,
    origin_paths: Vec<String>,
    events: Arc<SecurityEventLog>,
}

impl UrlGuard {
    pub fn new(
        policy: SsrfPolicy,
        default_origin: impl Into<String>,
        origin_paths: Vec<String>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            default_origin: default_origin.into(),
            origin_paths,
            events,
        }
    }

    /// Guard for the configuration's active profile.
    pub fn from_config(config: &GuardConfig, events: Arc<SecurityEventLog>) -> Self {
        Self::new(
            SsrfPolicy::from(config.active_ssrf()),
            config.ssrf.default_origin.clone(),
            config.ssrf.origin_checked_paths.clone(),
            events,
        )
    }

    /// Snapshot of the active policy.
    pub fn policy(&self) -> Arc<SsrfPolicy> {
        self.policy.load_full()
    }

    /// Replace the active policy. In-flight validations finish on the old one.
    pub fn reload(&self, policy: SsrfPolicy) {
        tracing::info!(
            allowed_domains = ?policy.allowed_domains,
            allow_private_networks = policy.allow_private_networks,
            "SSRF policy reloaded"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Validate a URL the server itself is about to use.
    pub fn validate(&self, url: &str, context: &str) -> UrlValidation {
        self.validate_for(url, context, &ClientContext::internal())
    }

    /// Validate a URL supplied by `client`.
    pub fn validate_for(&self, url: &str, context: &str, client: &ClientContext) -> UrlValidation {
        let eval = evaluate(&self.policy.load(), url);
        let detail = json!({
            "url": url,
            "hostname": eval.hostname,
            "port": eval.port,
            "context": context,
        });

        match eval.outcome {
            Ok(()) => {
                self.events.info(EventType::UrlValidated, detail, client);
                UrlValidation::accepted(url)
            }
            Err(reason) => {
                let mut detail = detail;
                detail["reason"] = Value::from(reason.as_str());
                self.events.alert(EventType::SsrfBlocked, detail, client);
                metrics::record_ssrf_blocked(reason.as_str());
                UrlValidation::rejected(reason)
            }
        }
    }

    /// Validate an `Origin` header. A missing header is invalid.
    pub fn validate_origin(&self, origin: Option<&str>, client: &ClientContext) -> UrlValidation {
        match origin.map(str::trim).filter(|o| !o.is_empty()) {
            Some(origin) => self.validate_for(origin, "origin-header", client),
            None => {
                self.events.alert(
                    EventType::OriginMissing,
                    json!({ "context": "origin-header" }),
                    client,
                );
                UrlValidation::rejected(UrlRejectReason::Missing)
            }
        }
    }

    /// Origin to build callback URLs from: the supplied one if it validates,
    /// otherwise the configured default.
    pub fn safe_origin(&self, origin: Option<&str>, client: &ClientContext) -> String {
        self.validate_origin(origin, client)
            .sanitized
            .unwrap_or_else(|| self.default_origin.clone())
    }

    /// Whether requests to `path` must carry a valid origin (when present).
    pub fn requires_origin_check(&self, path: &str) -> bool {
        self.origin_paths.iter().any(|marker| path.contains(marker.as_str()))
    }

    /// Validate every sensitive URL parameter in the query and in a JSON
    /// object body. The first failure is returned.
    pub fn validate_url_parameters(
        &self,
        query: &[(String, String)],
        body: Option<&Value>,
        client: &ClientContext,
    ) -> Result<(), UrlParameterViolation> {
        for &parameter in SENSITIVE_PARAMETERS {
            let value = query
                .iter()
                .find(|(key, value)| key == parameter && !value.is_empty())
                .map(|(_, value)| value.as_str());
            if let Some(value) = value {
                self.check_parameter(parameter, "query", value, client)?;
            }
        }

        let Some(Value::Object(body)) = body else {
            return Ok(());
        };
        for &parameter in SENSITIVE_PARAMETERS {
            match body.get(parameter) {
                None | Some(Value::Null) | Some(Value::Bool(false)) => {}
                Some(Value::String(value)) if value.is_empty() => {}
                Some(Value::String(value)) => {
                    self.check_parameter(parameter, "body", value, client)?;
                }
                Some(other) => {
                    self.check_parameter(parameter, "body", &other.to_string(), client)?;
                }
            }
        }
        Ok(())
    }

    fn check_parameter(
        &self,
        parameter: &'static str,
        location: &'static str,
        value: &str,
        client: &ClientContext,
    ) -> Result<(), UrlParameterViolation> {
        let context = format!("{location}-param-{parameter}");
        let result = self.validate_for(value, &context, client);
        match result.reason {
            None => Ok(()),
            Some(reason) => Err(UrlParameterViolation {
                parameter,
                location,
                reason,
            }),
        }
    }
}
