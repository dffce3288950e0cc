//! Defensive request pipeline for a storefront API.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GuardConfig;
pub use error::{GuardError, GuardResult, Rejection};
pub use http::HttpServer;
pub use identity::ClientIdentity;
pub use lifecycle::Shutdown;
pub use security::pipeline::{Decision, RequestPipeline};
