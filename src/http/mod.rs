//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body limit)
//!     → middleware/guard.rs (buffer body, build InboundRequest,
//!                            run the pipeline, rebuild sanitized request)
//!     → handler
//!     → middleware/guard.rs (response hook, RateLimit-* headers)
//!     → response.rs (security headers)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{InboundRequest, X_REQUEST_ID};
pub use server::HttpServer;
