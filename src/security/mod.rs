//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → monitoring.rs (advisory pattern/anomaly logging)
//!     → sanitizer.rs (drop `$` keys, strip markup, redact operators)
//!     → monitoring.rs (blocking request-line validation)
//!     → rate_limit.rs + throttle.rs (per-identity windows)
//!     → ssrf.rs (origin and outbound URL parameters)
//!     → Pass to handler
//! ```
//! `pipeline.rs` owns the ordering; every stage reports to the
//! security event log.
//!
//! # Design Decisions
//! - Advisory detection logs, validation rejects
//! - Sanitizer faults pass the original payload through
//! - Per-key atomic counters (dashmap entry guard)

pub mod monitoring;
pub mod patterns;
pub mod pipeline;
pub mod rate_limit;
pub mod sanitizer;
pub mod ssrf;
pub mod throttle;

pub use pipeline::{Admission, CompletionToken, Decision, Refusal, RequestPipeline};
pub use rate_limit::{PolicyClass, RateLimiter};
pub use sanitizer::{SanitizedInput, Sanitizer};
pub use ssrf::{SsrfPolicy, UrlGuard, UrlValidation};
