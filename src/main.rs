//! Storefront guard
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ guard middleware ──▶ handler
//!                                       │
//!                                       ▼
//!                              ┌──────────────────┐
//!                              │ RequestPipeline  │
//!                              │  monitor         │
//!                              │  sanitizer       │
//!                              │  rate limits     │
//!                              │  throttle        │
//!                              │  url guard       │
//!                              └────────┬─────────┘
//!                                       ▼
//!                              SecurityEventLog ──▶ tracing, metrics,
//!                                                   dated log files
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use storefront_guard::clock;
use storefront_guard::config::loader::load_config;
use storefront_guard::config::watcher::ConfigWatcher;
use storefront_guard::http::HttpServer;
use storefront_guard::lifecycle::{signals, Shutdown};
use storefront_guard::observability::{logging, metrics, EventSink, RetentionPolicy};
use storefront_guard::{GuardConfig, RequestPipeline};

#[derive(Parser)]
#[command(name = "storefront-guard", version, about = "Defensive request pipeline for a storefront API")]
struct Args {
    /// Path to the TOML configuration. Defaults apply when absent.
    #[arg(short, long, env = "GUARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    }
    .with_env_profile();

    logging::init(config.profile, &config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        profile = config.profile.as_str(),
        bind_address = %config.listener.bind_address,
        block_suspicious = config.block_suspicious(),
        "storefront-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let sink = if config.logging.durable {
        let (sink, _writer) = EventSink::spawn(
            &config.logging.directory,
            RetentionPolicy::from(&config.logging),
        );
        Some(sink)
    } else {
        None
    };

    let pipeline = Arc::new(RequestPipeline::from_config(&config, clock::system(), sink));

    let (_watcher, updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Configuration watcher unavailable; reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::trigger_on_signal(shutdown.clone()));

    HttpServer::new(&config, pipeline)
        .run(listener, shutdown, updates)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
