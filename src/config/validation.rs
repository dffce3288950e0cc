//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics and reports every
//! problem at once rather than stopping at the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::{GuardConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem in a [`GuardConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("ssrf.{profile}.allowed_domains must not be empty")]
    EmptyAllowList { profile: &'static str },

    #[error("ssrf.default_origin `{0}` is not an absolute http(s) URL")]
    InvalidDefaultOrigin(String),

    #[error("monitoring.{field} must be greater than zero")]
    ZeroMonitoringValue { field: &'static str },

    #[error("monitoring.ring_capacity ({capacity}) is below suspicion_threshold ({threshold})")]
    RingBelowThreshold { capacity: usize, threshold: usize },

    #[error("throttle.{field} must be greater than zero")]
    ZeroThrottleValue { field: &'static str },

    #[error("logging.{field} must be greater than zero")]
    ZeroRetention { field: &'static str },

    #[error("security.trusted_ips contains an invalid address `{0}`")]
    InvalidTrustedIp(String),

    #[error("admin.api_key must be changed from the placeholder in production")]
    PlaceholderAdminKey,
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.ssrf.development.allowed_domains.is_empty() {
        errors.push(ValidationError::EmptyAllowList {
            profile: "development",
        });
    }
    if config.ssrf.production.allowed_domains.is_empty() {
        errors.push(ValidationError::EmptyAllowList {
            profile: "production",
        });
    }

    match Url::parse(&config.ssrf.default_origin) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
        _ => errors.push(ValidationError::InvalidDefaultOrigin(
            config.ssrf.default_origin.clone(),
        )),
    }

    let monitoring = &config.monitoring;
    for (field, value) in [
        ("suspicion_threshold", monitoring.suspicion_threshold as u64),
        ("suspicion_window_secs", monitoring.suspicion_window_secs),
        ("ring_capacity", monitoring.ring_capacity as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroMonitoringValue { field });
        }
    }
    // Scoring only sees what the ring retains.
    if monitoring.ring_capacity < monitoring.suspicion_threshold {
        errors.push(ValidationError::RingBelowThreshold {
            capacity: monitoring.ring_capacity,
            threshold: monitoring.suspicion_threshold,
        });
    }

    if config.throttle.enabled && config.throttle.window_secs == 0 {
        errors.push(ValidationError::ZeroThrottleValue {
            field: "window_secs",
        });
    }

    let logging = &config.logging;
    for (field, days) in [
        ("app_retention_days", logging.app_retention_days),
        ("security_retention_days", logging.security_retention_days),
        ("audit_retention_days", logging.audit_retention_days),
    ] {
        if days == 0 {
            errors.push(ValidationError::ZeroRetention { field });
        }
    }

    for ip in &config.security.trusted_ips {
        if ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(ValidationError::InvalidTrustedIp(ip.clone()));
        }
    }

    if config.profile.is_production()
        && config.admin.enabled
        && config.admin.api_key == PLACEHOLDER_API_KEY
    {
        errors.push(ValidationError::PlaceholderAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
