//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every guard stage:
//!     → events.rs (SecurityEventLog::record)
//!         → tracing mirror (info / warn / error)
//!         → metrics.rs (event counters)
//!         → sink.rs (date-partitioned JSON lines, background writer)
//!         → ring buffer + suspicion scoring (alert/threat only)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, JSON in production)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin stats endpoint
//! ```
//!
//! # Design Decisions
//! - Recording an event never fails the request that produced it
//! - Disk writes happen off the request path
//! - Metrics are cheap (atomic increments)

pub mod events;
pub mod logging;
pub mod metrics;
pub mod sink;

pub use events::{
    ClientContext, EventLogSettings, EventType, SecurityEvent, SecurityEventLog, SecurityStats,
    Severity,
};
pub use sink::{EventSink, LogCategory, RetentionPolicy};
