//! OPC UA TCP stack server.
//!
//! [`UaTcpStackServer`] accepts connections and walks each one through the
//! Hello → Opening → Open pipeline, maintains the secure-channel table, and
//! dispatches decoded requests to registered handlers.
//!
//! ```no_run
//! # async fn example() -> Result<(), uastack_server::ServerError> {
//! use std::sync::Arc;
//! use uastack_core::message::{RequestKind, RequestMessage, ResponseHeader, ResponseMessage,
//!     TestStackResponse};
//! use uastack_core::security::NonePolicy;
//! use uastack_core::MessageSecurityMode;
//! use uastack_server::{ServerConfig, UaTcpStackServer};
//!
//! let server = UaTcpStackServer::new(ServerConfig::new("127.0.0.1:12685"));
//! server.add_endpoint(
//!     "opc.tcp://localhost:12685/test",
//!     Arc::new(NonePolicy),
//!     MessageSecurityMode::None,
//! );
//! server.add_request_handler(RequestKind::TestStack, Arc::new(|request| {
//!     let RequestMessage::TestStack(r) = request else { unreachable!() };
//!     ResponseMessage::TestStack(TestStackResponse {
//!         response_header: ResponseHeader::good(r.request_header.request_handle),
//!         output: r.input.clone(),
//!     })
//! }));
//! server.startup().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod logging;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use uastack_core::channel::{SecureChannel, SequenceNumber};
use uastack_core::message::RequestKind;
use uastack_core::{MessageSecurityMode, SecurityPolicy};

pub use config::ServerConfig;
pub use dispatch::RequestHandler;
pub use error::ServerError;

use dispatch::Dispatcher;
use endpoint::EndpointRegistry;

/// Shared state behind one server instance.
pub(crate) struct ServerContext {
    pub config: ServerConfig,
    pub endpoints: EndpointRegistry,
    pub dispatcher: Dispatcher,
    /// Open secure channels by id. A channel survives its socket so a
    /// client can re-open it; CLO and shutdown remove it.
    channels: Mutex<HashMap<u32, Arc<SecureChannel>>>,
    /// Force-close levers for currently bound connections.
    connections: Mutex<HashMap<u32, watch::Sender<bool>>>,
    /// Channel id allocator; starts at 1, never hands out zero.
    pub next_channel_id: SequenceNumber,
    /// Token id allocator, shared across channels.
    pub next_token_id: SequenceNumber,
}

impl ServerContext {
    pub fn channel(&self, channel_id: u32) -> Option<Arc<SecureChannel>> {
        self.channels
            .lock()
            .expect("lock poisoned")
            .get(&channel_id)
            .cloned()
    }

    pub fn register_channel(&self, channel: Arc<SecureChannel>) {
        self.channels
            .lock()
            .expect("lock poisoned")
            .insert(channel.channel_id(), channel);
    }

    pub fn remove_channel(&self, channel_id: u32) {
        self.channels.lock().expect("lock poisoned").remove(&channel_id);
    }

    pub fn register_connection(&self, channel_id: u32, close: watch::Sender<bool>) {
        self.connections
            .lock()
            .expect("lock poisoned")
            .insert(channel_id, close);
    }

    pub fn remove_connection(&self, channel_id: u32) {
        self.connections
            .lock()
            .expect("lock poisoned")
            .remove(&channel_id);
    }
}

/// Server half of the OPC UA TCP stack.
pub struct UaTcpStackServer {
    ctx: Arc<ServerContext>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UaTcpStackServer {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            ctx: Arc::new(ServerContext {
                config,
                endpoints: EndpointRegistry::new(),
                dispatcher: Dispatcher::new(),
                channels: Mutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                next_channel_id: SequenceNumber::new(1),
                next_token_id: SequenceNumber::new(1),
            }),
            shutdown: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Register an endpoint: url, policy, and message security mode.
    pub fn add_endpoint(
        &self,
        url: impl Into<String>,
        policy: Arc<dyn SecurityPolicy>,
        mode: MessageSecurityMode,
    ) -> &Self {
        self.ctx.endpoints.add(url, policy, mode);
        self
    }

    /// Register a handler for one request kind.
    pub fn add_request_handler(&self, kind: RequestKind, handler: RequestHandler) -> &Self {
        self.ctx.dispatcher.add(kind, handler);
        self
    }

    /// Bind the listener and start accepting connections.
    pub async fn startup(&self) -> Result<(), ServerError> {
        let mut shutdown_guard = self.shutdown.lock().expect("lock poisoned");
        if shutdown_guard.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.ctx.config.bind_addr)
            .await
            .map_err(ServerError::Io)?;
        let addr = listener.local_addr().map_err(ServerError::Io)?;
        *self.local_addr.lock().expect("lock poisoned") = Some(addr);
        info!("{}: listening on {addr}", self.ctx.config.server_name);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *shutdown_guard = Some(shutdown_tx);

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(accept_loop(listener, ctx, shutdown_rx));
        Ok(())
    }

    /// Stop accepting, close every connection, and drop all channels.
    pub async fn shutdown(&self) {
        if let Some(shutdown) = self.shutdown.lock().expect("lock poisoned").take() {
            let _ = shutdown.send(true);
        }

        let connections: Vec<_> = self
            .ctx
            .connections
            .lock()
            .expect("lock poisoned")
            .drain()
            .collect();
        for (_, close) in connections {
            let _ = close.send(true);
        }
        self.ctx.channels.lock().expect("lock poisoned").clear();
        *self.local_addr.lock().expect("lock poisoned") = None;
    }

    /// The bound listener address, available after startup.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("lock poisoned")
    }

    /// Look up an open secure channel.
    #[must_use]
    pub fn secure_channel(&self, channel_id: u32) -> Option<Arc<SecureChannel>> {
        self.ctx.channel(channel_id)
    }

    /// Force-close the transport bound to a channel, leaving the channel in
    /// the table for the client to re-open.
    pub fn close_connection(&self, channel_id: u32) -> bool {
        let connections = self.ctx.connections.lock().expect("lock poisoned");
        match connections.get(&channel_id) {
            Some(close) => close.send(true).is_ok(),
            None => false,
        }
    }

    /// Number of open secure channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.ctx.channels.lock().expect("lock poisoned").len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            },
            _ = shutdown.changed() => {
                debug!("accept loop stopping");
                break;
            }
        };

        info!("accepted connection from {peer}");
        tokio::spawn(connection::serve(Arc::clone(&ctx), stream, peer));
    }
}
