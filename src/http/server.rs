//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: storefront routes grouped by rate-limit class,
//!   each group behind the guard middleware, plus the admin router behind
//!   the login limits
//! - Wire up middleware (tracing, request ID, timeout, body limit,
//!   security headers)
//! - Run background upkeep (expired window sweep, SSRF policy reload)
//! - Bind server to listener with graceful shutdown
//!
//! The storefront handlers are stand-ins that echo the sanitized input; a
//! real host mounts its own handlers in the same groups.

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::GuardConfig;
use crate::http::middleware::{guard_middleware, GuardState};
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::http::response::with_security_headers;
use crate::lifecycle::Shutdown;
use crate::security::pipeline::RequestPipeline;
use crate::security::rate_limit::PolicyClass;
use crate::security::sanitizer::SanitizedInput;
use crate::security::ssrf::SsrfPolicy;

/// Interval between sweeps of expired rate-limit and throttle windows.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// HTTP server for the storefront guard.
pub struct HttpServer {
    router: Router,
    pipeline: Arc<RequestPipeline>,
}

impl HttpServer {
    pub fn new(config: &GuardConfig, pipeline: Arc<RequestPipeline>) -> Self {
        let router = Self::build_router(config, pipeline.clone());
        Self { router, pipeline }
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, pipeline: Arc<RequestPipeline>) -> Router {
        let guard = GuardState {
            pipeline: pipeline.clone(),
            class: PolicyClass::General,
            verbose_errors: !config.profile.is_production(),
            max_body_size: config.security.max_body_size,
        };

        let general = Router::new()
            .route("/", get(echo))
            .route("/api/product/list", get(echo))
            .route("/api/product/{id}", get(echo));
        let auth = Router::new()
            .route("/api/user/login", post(echo))
            .route("/api/seller/login", post(echo));
        let register = Router::new().route("/api/user/register", post(echo));
        let upload = Router::new().route("/api/product/add", post(echo));
        let cart = Router::new().route("/api/cart/update", post(echo));
        let order = Router::new()
            .route("/api/order/cod", post(echo))
            .route("/api/order/stripe", post(echo));
        let search = Router::new().route("/api/product/search", get(echo));
        let profile = Router::new().route("/api/user/profile", get(echo).post(echo));

        let mut app = Router::new()
            .merge(guarded(general, &guard, PolicyClass::General))
            .merge(guarded(auth, &guard, PolicyClass::Auth))
            .merge(guarded(register, &guard, PolicyClass::Register))
            .merge(guarded(upload, &guard, PolicyClass::Upload))
            .merge(guarded(cart, &guard, PolicyClass::Cart))
            .merge(guarded(order, &guard, PolicyClass::Order))
            .merge(guarded(search, &guard, PolicyClass::Search))
            .merge(guarded(profile, &guard, PolicyClass::Profile));

        // Operator routes get the login limits, ahead of the key check.
        if config.admin.enabled {
            let admin = setup_admin_router(AdminState {
                events: pipeline.events().clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
            });
            app = app.merge(guarded(admin, &guard, PolicyClass::Auth));
        }
        if config.security.enable_headers {
            app = with_security_headers(app);
        }

        let request_id = HeaderName::from_static(X_REQUEST_ID);
        app.layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.security.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id, UuidRequestId))
    }

    /// Run the server until `shutdown` fires. Configuration reloads received
    /// on `config_updates` replace the SSRF policy.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: Shutdown,
        config_updates: Option<UnboundedReceiver<GuardConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(sweep_expired(self.pipeline.clone(), shutdown.clone()));
        if let Some(updates) = config_updates {
            tokio::spawn(apply_reloads(self.pipeline.clone(), updates, shutdown.clone()));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Put `routes` behind the guard with the limits of `class`.
fn guarded(routes: Router, guard: &GuardState, class: PolicyClass) -> Router {
    routes.route_layer(middleware::from_fn_with_state(
        guard.with_class(class),
        guard_middleware,
    ))
}

async fn echo(Extension(input): Extension<SanitizedInput>) -> Json<Value> {
    Json(json!({ "success": true, "data": input }))
}

async fn sweep_expired(pipeline: Arc<RequestPipeline>, shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = pipeline.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired rate-limit windows");
                }
            }
            _ = stop.recv() => break,
        }
    }
}

async fn apply_reloads(
    pipeline: Arc<RequestPipeline>,
    mut updates: UnboundedReceiver<GuardConfig>,
    shutdown: Shutdown,
) {
    let mut stop = shutdown.subscribe();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => pipeline.url_guard().reload(SsrfPolicy::from(config.active_ssrf())),
                None => break,
            },
            _ = stop.recv() => break,
        }
    }
}
