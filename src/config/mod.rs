//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! guard.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → profile override from GUARD_PROFILE
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → SSRF allow-list swapped atomically in the URL guard
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, GuardConfig, LoggingConfig, MonitoringConfig, Profile, SecurityConfig,
    SsrfConfig, SsrfProfileConfig, ThrottleConfig,
};
