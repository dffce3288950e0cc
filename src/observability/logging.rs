//! Structured logging setup.
//!
//! JSON lines in production, human-readable output in development. The
//! configured level can always be overridden with `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Profile;

/// Install the global tracing subscriber. Repeated calls are ignored.
pub fn init(profile: Profile, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "storefront_guard={level},guard_cli={level},tower_http={level}"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match profile {
        Profile::Production => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
        Profile::Development => registry.with(fmt::layer()).try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(profile = profile.as_str(), "Logging initialized");
    }
}
