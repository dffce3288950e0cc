//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every section
//! has defaults so an empty file yields the development configuration.
//! Rate-limit policy numbers are deliberately absent: they are compiled
//! constants in [`crate::security::rate_limit`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Deployment profile; selects the SSRF table and message verbosity.
    pub profile: Profile,

    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Outbound URL (SSRF) policy.
    pub ssrf: SsrfConfig,

    /// Security event aggregation and request monitoring.
    pub monitoring: MonitoringConfig,

    /// Soft back-pressure settings.
    pub throttle: ThrottleConfig,

    /// Durable security log files.
    pub logging: LoggingConfig,

    /// Tracing level and metrics exporter.
    pub observability: ObservabilityConfig,

    /// Admin endpoints.
    pub admin: AdminConfig,

    /// Request hardening.
    pub security: SecurityConfig,
}

impl GuardConfig {
    /// Apply the `GUARD_PROFILE` environment override, if set.
    pub fn with_env_profile(mut self) -> Self {
        if let Ok(value) = std::env::var("GUARD_PROFILE") {
            self.profile = Profile::parse(&value);
        }
        self
    }

    /// SSRF table for the active profile.
    pub fn active_ssrf(&self) -> &SsrfProfileConfig {
        match self.profile {
            Profile::Development => &self.ssrf.development,
            Profile::Production => &self.ssrf.production,
        }
    }

    /// Whether suspicious identities are refused outright.
    pub fn block_suspicious(&self) -> bool {
        self.monitoring
            .block_suspicious
            .unwrap_or(self.profile.is_production())
    }
}

/// Deployment profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    /// Parse a profile name; anything unrecognised is development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Profile::Production,
            _ => Profile::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Profile::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
        }
    }
}

/// SSRF policy tables, one per profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsrfConfig {
    pub development: SsrfProfileConfig,
    pub production: SsrfProfileConfig,

    /// Fallback origin for callback URLs when the request Origin fails.
    pub default_origin: String,

    /// Path fragments whose requests have their Origin header validated.
    pub origin_checked_paths: Vec<String>,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            development: SsrfProfileConfig {
                allowed_domains: vec![
                    "localhost".to_string(),
                    "127.0.0.1".to_string(),
                    "0.0.0.0".to_string(),
                    "api.stripe.com".to_string(),
                    "api.cloudinary.com".to_string(),
                    "res.cloudinary.com".to_string(),
                ],
                allow_private_networks: true,
                strict_mode: false,
            },
            production: SsrfProfileConfig::default(),
            default_origin: "http://localhost:5173".to_string(),
            origin_checked_paths: vec![
                "/stripe".to_string(),
                "/payment".to_string(),
                "/callback".to_string(),
            ],
        }
    }
}

/// Allow-list and private-network toggle for one profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SsrfProfileConfig {
    /// Domains (and their subdomains) permitted as outbound targets.
    pub allowed_domains: Vec<String>,

    /// Permit loopback, RFC 1918 and link-local literals.
    pub allow_private_networks: bool,

    /// Reject URLs carrying embedded credentials (`user:pass@host`).
    pub strict_mode: bool,
}

impl Default for SsrfProfileConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec![
                "api.stripe.com".to_string(),
                "api.cloudinary.com".to_string(),
                "res.cloudinary.com".to_string(),
            ],
            allow_private_networks: false,
            strict_mode: true,
        }
    }
}

/// Security event aggregation and request monitoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Alert/threat events within the window that flag an identity.
    pub suspicion_threshold: usize,

    /// Trailing window for suspicion scoring, in seconds.
    pub suspicion_window_secs: u64,

    /// Events retained in memory per identity.
    pub ring_capacity: usize,

    /// Refuse suspicious identities with 403. Defaults to on in production.
    pub block_suspicious: Option<bool>,

    /// Path prefixes whose traffic is logged as sensitive.
    pub sensitive_endpoints: Vec<String>,

    /// User-agent fragments of known scanners.
    pub suspicious_user_agents: Vec<String>,

    /// Content-Length above which a request is flagged as anomalous.
    pub max_content_length: u64,

    /// Origin fragment expected on POST requests.
    pub trusted_origin: String,
}

impl MonitoringConfig {
    pub fn suspicion_window(&self) -> Duration {
        Duration::from_secs(self.suspicion_window_secs)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            suspicion_threshold: 10,
            suspicion_window_secs: 15 * 60,
            ring_capacity: 100,
            block_suspicious: None,
            sensitive_endpoints: [
                "/api/user/login",
                "/api/user/register",
                "/api/auth0-user",
                "/api/seller/login",
                "/api/seller/register",
                "/api/user/profile",
                "/api/seller/profile",
                "/api/order",
                "/api/cart",
                "/api/address",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            suspicious_user_agents: ["sqlmap", "nikto", "nmap", "masscan", "zmap", "gobuster", "dirb"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_content_length: 50 * 1024 * 1024,
            trusted_origin: "localhost:5173".to_string(),
        }
    }
}

/// Speed throttle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,

    /// Rolling window in seconds.
    pub window_secs: u64,

    /// Requests per window served at full speed.
    pub delay_after: u32,

    /// Added latency per request beyond `delay_after`, in milliseconds.
    pub delay_ms: u64,

    /// Cap on the added latency, in milliseconds.
    pub max_delay_ms: u64,

    /// Do not count requests that completed with a non-error status.
    pub skip_successful_requests: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 15 * 60,
            delay_after: 50,
            delay_ms: 500,
            max_delay_ms: 5_000,
            skip_successful_requests: true,
        }
    }
}

/// Durable security log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write events to date-partitioned files.
    pub durable: bool,

    /// Directory holding the log files.
    pub directory: String,

    /// Retention for general application events, in days.
    pub app_retention_days: u32,

    /// Retention for security alerts and threats, in days.
    pub security_retention_days: u32,

    /// Retention for the audit trail, in days.
    pub audit_retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            durable: true,
            directory: "logs".to_string(),
            app_retention_days: 30,
            security_retention_days: 90,
            audit_retention_days: 365,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Placeholder key rejected by validation in production.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: PLACEHOLDER_API_KEY.to_string(),
        }
    }
}

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add X-Frame-Options, X-Content-Type-Options, X-XSS-Protection.
    pub enable_headers: bool,

    /// Maximum body size in bytes.
    pub max_body_size: usize,

    /// Total request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Addresses exempt from rate limiting and throttling.
    pub trusted_ips: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
            request_timeout_secs: 30,
            trusted_ips: Vec::new(),
        }
    }
}
