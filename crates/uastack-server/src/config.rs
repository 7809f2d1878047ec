//! Server configuration.

use std::sync::Arc;
use std::time::Duration;

use uastack_core::channel::ChannelConfig;
use uastack_core::security::ApplicationKeyPair;

/// Configuration for a [`UaTcpStackServer`](crate::UaTcpStackServer).
#[derive(Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to, e.g. `127.0.0.1:12685`.
    pub bind_addr: String,
    /// Human-readable server name for logs.
    pub server_name: String,
    /// Local transport limits applied during negotiation.
    pub channel: ChannelConfig,
    /// Application keys; required to accept secured endpoints.
    pub keypair: Option<Arc<ApplicationKeyPair>>,
    /// Upper bound on issued security token lifetimes.
    pub max_token_lifetime: Duration,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            server_name: "uastack-server".to_string(),
            channel: ChannelConfig::default(),
            keypair: None,
            max_token_lifetime: Duration::from_secs(3600),
        }
    }

    pub fn with_keypair(mut self, keypair: Arc<ApplicationKeyPair>) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }
}
