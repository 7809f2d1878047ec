//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use uastack_core::channel::ChannelConfig;
use uastack_core::message::EndpointDescription;
use uastack_core::security::{self, ApplicationKeyPair, NonePolicy};
use uastack_core::{MessageSecurityMode, SecurityPolicy};

use crate::error::ClientError;

/// Configuration for a [`UaTcpStackClient`](crate::UaTcpStackClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Endpoint to connect to, `opc.tcp://host:port/path`.
    pub endpoint_url: String,
    /// Security policy protecting the channel.
    pub security_policy: Arc<dyn SecurityPolicy>,
    /// How MSG chunks are protected.
    pub security_mode: MessageSecurityMode,
    /// Server certificate, required for encrypting the handshake under a
    /// secured policy. Usually taken from a GetEndpoints answer.
    pub server_certificate: Option<Vec<u8>>,
    /// Local application keys; required under a secured policy.
    pub keypair: Option<Arc<ApplicationKeyPair>>,
    /// Local transport limits fed into HEL.
    pub channel: ChannelConfig,
    /// Requested security token lifetime.
    pub channel_lifetime: Duration,
    /// Timeout for socket connect plus handshake.
    pub connect_timeout: Duration,
    /// Default timeout for a request whose header does not carry a hint.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// A configuration with no channel security.
    pub fn no_security(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            security_policy: Arc::new(NonePolicy),
            security_mode: MessageSecurityMode::None,
            server_certificate: None,
            keypair: None,
            channel: ChannelConfig::default(),
            channel_lifetime: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// A configuration targeting one advertised endpoint.
    pub fn for_endpoint(
        endpoint: &EndpointDescription,
        keypair: Arc<ApplicationKeyPair>,
    ) -> Result<Self, ClientError> {
        let security_policy = security::policy_from_uri(&endpoint.security_policy_uri)?;
        Ok(Self {
            endpoint_url: endpoint.endpoint_url.clone(),
            security_policy,
            security_mode: endpoint.security_mode,
            server_certificate: endpoint.server_certificate.clone(),
            keypair: Some(keypair),
            channel: ChannelConfig::default(),
            channel_lifetime: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
        })
    }
}

/// Extract the `host:port` part of an `opc.tcp://` endpoint url.
pub fn socket_address(endpoint_url: &str) -> Result<String, ClientError> {
    let rest = endpoint_url
        .strip_prefix("opc.tcp://")
        .ok_or_else(|| ClientError::InvalidEndpointUrl(endpoint_url.to_string()))?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() || !authority.contains(':') {
        return Err(ClientError::InvalidEndpointUrl(endpoint_url.to_string()));
    }
    Ok(authority.to_string())
}
