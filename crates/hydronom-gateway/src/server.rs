//! [`GatewayServer`] – HTTP + WebSocket front door of the telemetry engine.
//!
//! Listens on `0.0.0.0:5000` (configurable through the builder methods) and
//! serves the filter tree built by [`Router::into_filter`] with warp:
//!
//! * `/ws/telemetry/{vehicleId}` with `Upgrade: websocket` → live subscription.
//! * `/api/*` → JSON API.

use std::future::Future;
use std::net::SocketAddr;

use hydronom_kernel::ControlPlane;
use hydronom_middleware::CommandDrain;
use hydronom_types::FleetError;
use tokio::sync::watch;
use tracing::info;

use crate::routes::Router;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// HTTP + WebSocket server bound to one [`ControlPlane`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use hydronom_gateway::GatewayServer;
/// use hydronom_kernel::ControlPlane;
/// use hydronom_middleware::{SubscriptionHub, command_queue};
/// use hydronom_store::{Journal, StateCache};
///
/// #[tokio::main]
/// async fn main() -> Result<(), hydronom_types::FleetError> {
///     let (commands, drain) = command_queue();
///     let plane = ControlPlane::new(
///         Arc::new(StateCache::new()),
///         Arc::new(Journal::open("logs")?),
///         Arc::new(SubscriptionHub::default()),
///         commands,
///     );
///     let (_stop, shutdown) = tokio::sync::watch::channel(false);
///     GatewayServer::new(plane, drain).with_port(5000).run(shutdown).await
/// }
/// ```
pub struct GatewayServer {
    router: Router,
    bind_address: String,
    port: u16,
}

impl GatewayServer {
    /// Create a server on [`DEFAULT_BIND_ADDRESS`]:[`DEFAULT_PORT`].
    ///
    /// The server takes ownership of `drain`, the single consumer end of
    /// the command queue.
    pub fn new(plane: ControlPlane, drain: CommandDrain) -> Self {
        Self {
            router: Router::new(plane, drain),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.router = self.router.with_auth_token(token);
        self
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.router = self.router.with_cors_origin(origin);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Bind the configured address and serve until `shutdown` flips to
    /// `true` or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Transport`] if the listener cannot bind and
    /// [`FleetError::Validation`] for a malformed CORS origin.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), FleetError> {
        let (_, server) = self.bind(shutdown).await?;
        server.await;
        info!("gateway stopped");
        Ok(())
    }

    /// Bind without serving yet. Returns the bound address (useful with
    /// port `0`) and the future that runs the server until shutdown.
    pub async fn bind(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, impl Future<Output = ()>), FleetError> {
        let target = format!("{}:{}", self.bind_address, self.port);
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| FleetError::Transport(format!("cannot resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| FleetError::Transport(format!("no address for {target}")))?;

        let filter = self.router.into_filter()?;
        let (local, server) = warp::serve(filter)
            .try_bind_with_graceful_shutdown(addr, stop_signal(shutdown))
            .map_err(|e| FleetError::Transport(format!("bind error on {addr}: {e}")))?;
        info!(addr = %local, "gateway listening");
        Ok((local, server))
    }
}

/// Resolves once `shutdown` reads `true` or its sender is gone.
async fn stop_signal(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    info!("gateway shutting down");
}
