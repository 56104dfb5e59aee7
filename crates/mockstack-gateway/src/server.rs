//! Embeddable mock server.
//!
//! ```no_run
//! use mockstack_core::MockStackConfig;
//! use mockstack_gateway::MockServer;
//!
//! # async fn run() -> Result<(), mockstack_gateway::GatewayError> {
//! let config = MockStackConfig {
//!     gateway_listen: "127.0.0.1:0".to_owned(),
//!     ..MockStackConfig::default()
//! };
//! let server = MockServer::new(config).start().await?;
//! println!("endpoint: {}", server.endpoint_url());
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use mockstack_core::{MockStackConfig, MockStackResult};
use mockstack_protocol::ServiceMock;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::gateway::GatewayService;
use crate::registry::MockRegistry;

/// How long [`RunningServer::stop`] waits for in-flight connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured, not yet listening server.
#[derive(Debug)]
pub struct MockServer {
    config: MockStackConfig,
    registry: Arc<MockRegistry>,
}

impl MockServer {
    /// Build a server with every compiled-in mock enabled by `config`.
    #[must_use]
    pub fn new(config: MockStackConfig) -> Self {
        let scope = config.scope();
        let registry = MockRegistry::new();
        for mock in mockstack_services::builtin_mocks(&scope) {
            if config.is_enabled(mock.name()) {
                registry.register(mock);
            }
        }
        for name in &config.services {
            if !registry.contains(name) {
                warn!(service = %name, "requested service is not compiled in, skipping");
            }
        }
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    /// Build a server from the environment (see [`MockStackConfig::from_env`]).
    pub fn from_env() -> MockStackResult<Self> {
        Ok(Self::new(MockStackConfig::from_env()?))
    }

    /// Add a mock, replacing any registered under the same name.
    #[must_use]
    pub fn register(self, mock: Arc<dyn ServiceMock>) -> Self {
        self.registry.register(mock);
        self
    }

    /// The registry this server will route through.
    #[must_use]
    pub fn registry(&self) -> &Arc<MockRegistry> {
        &self.registry
    }

    /// The configuration the server was built from.
    #[must_use]
    pub fn config(&self) -> &MockStackConfig {
        &self.config
    }

    /// Bind the listener and start serving in the background.
    pub async fn start(self) -> Result<RunningServer, GatewayError> {
        let listen = self.config.gateway_listen.as_str();
        let addr: SocketAddr = listen.parse().map_err(|source| GatewayError::InvalidAddress {
            addr: listen.to_owned(),
            source,
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: listen.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| GatewayError::Bind {
            addr: listen.to_owned(),
            source,
        })?;

        let service = GatewayService::new(Arc::clone(&self.registry));
        info!(
            addr = %local_addr,
            services = ?service.service_names(),
            "starting MockStack gateway"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, service, async move {
            shutdown_rx.await.ok();
        }));

        Ok(RunningServer {
            addr: local_addr,
            registry: self.registry,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// A listening server. Dropping it stops accepting connections without
/// waiting for them to drain; call [`stop`](Self::stop) to drain and reset.
#[derive(Debug)]
pub struct RunningServer {
    addr: SocketAddr,
    registry: Arc<MockRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunningServer {
    /// The bound address (with the real port when `:0` was requested).
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL to point clients at, e.g. `http://127.0.0.1:4566`.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The live registry; mocks registered here are routed to immediately.
    #[must_use]
    pub fn registry(&self) -> &Arc<MockRegistry> {
        &self.registry
    }

    /// Clear the state of every mock.
    pub fn reset(&self) {
        self.registry.reset_all();
    }

    /// Stop accepting connections, drain in-flight ones, then clear all state.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "gateway task failed");
            }
        }
        self.registry.reset_all();
        info!(addr = %self.addr, "MockStack gateway stopped");
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

/// Accept loop: one task per connection until `shutdown` resolves, then a
/// bounded graceful drain.
pub async fn serve(
    listener: TcpListener,
    service: GatewayService,
    shutdown: impl Future<Output = ()>,
) {
    let graceful = GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    drop(listener);
    if tokio::time::timeout(DRAIN_TIMEOUT, graceful.shutdown())
        .await
        .is_err()
    {
        warn!(timeout = ?DRAIN_TIMEOUT, "timed out draining connections");
    } else {
        info!("all connections drained");
    }
}
