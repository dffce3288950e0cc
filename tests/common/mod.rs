//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use storefront_guard::clock::MockClock;
use storefront_guard::{GuardConfig, HttpServer, RequestPipeline, Shutdown};

pub const ADMIN_KEY: &str = "integration-admin-key";

/// A guard server on an ephemeral port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub pipeline: Arc<RequestPipeline>,
    pub clock: MockClock,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Default configuration with a known admin key.
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// Start the server with `config` on 127.0.0.1:0.
pub async fn spawn_server(config: GuardConfig) -> TestServer {
    let clock = MockClock::default();
    let pipeline = Arc::new(RequestPipeline::new(&config, Arc::new(clock.clone())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(&config, pipeline.clone());
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, stop, None).await;
    });

    TestServer {
        addr,
        pipeline,
        clock,
        shutdown,
    }
}
