//! OPC UA TCP stack client.
//!
//! [`UaTcpStackClient`] drives a connection state machine (connect,
//! reconnect-on-loss, stale-channel retry, disconnect) and correlates
//! requests with responses over the secure channel. Requests submitted
//! before the handshake completes are queued and flushed in order once the
//! channel opens.
//!
//! ```no_run
//! # async fn example() -> Result<(), uastack_client::ClientError> {
//! use uastack_client::{ClientConfig, UaTcpStackClient};
//! use uastack_core::message::{RequestHeader, RequestMessage, TestStackRequest, Variant};
//!
//! let client = UaTcpStackClient::new(ClientConfig::no_security(
//!     "opc.tcp://localhost:12685/test",
//! ));
//! let _response = client
//!     .send_request(RequestMessage::TestStack(TestStackRequest {
//!         request_header: RequestHeader::new(1),
//!         test_id: 1,
//!         iteration: 0,
//!         input: Variant::Int32(42),
//!     }))
//!     .await?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fsm;
pub mod transport;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use uastack_core::channel::SecureChannel;
use uastack_core::message::{
    EndpointDescription, GetEndpointsRequest, RequestHeader, RequestMessage, ResponseMessage,
};
use uastack_core::status;
use uastack_core::UaError;

pub use config::ClientConfig;
pub use error::ClientError;

use fsm::Command;

/// Client half of the OPC UA TCP stack.
pub struct UaTcpStackClient {
    commands: mpsc::Sender<Command>,
}

impl UaTcpStackClient {
    /// Create the client and its state-machine task. Must be called within
    /// a tokio runtime; no connection is made until the first
    /// [`connect`](Self::connect) or [`send_request`](Self::send_request).
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            commands: fsm::spawn(config),
        }
    }

    /// Open the secure channel (or return the already-open one).
    pub async fn connect(&self) -> Result<Arc<SecureChannel>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)?
    }

    /// Send a request and await its response. Connects on demand when the
    /// channel is down; a connection lost mid-flight is reconnected and the
    /// request resent without surfacing an error here.
    pub async fn send_request(&self, request: RequestMessage) -> Result<ResponseMessage, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SendRequest { request, reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        let result = rx
            .await
            .map_err(|_| UaError::from_code(status::BAD_CONNECTION_CLOSED))?;
        result.map_err(ClientError::Ua)
    }

    /// Send CloseSecureChannel and shut the connection down.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Discover the endpoints a server advertises at `endpoint_url`,
    /// over a throwaway unsecured channel.
    pub async fn get_endpoints(endpoint_url: &str) -> Result<Vec<EndpointDescription>, ClientError> {
        let client = UaTcpStackClient::new(ClientConfig::no_security(endpoint_url));
        let response = client
            .send_request(RequestMessage::GetEndpoints(GetEndpointsRequest {
                request_header: RequestHeader::new(0),
                endpoint_url: endpoint_url.to_string(),
            }))
            .await?;
        client.disconnect().await;

        match response {
            ResponseMessage::GetEndpoints(response) => Ok(response.endpoints),
            ResponseMessage::ServiceFault(fault) => Err(ClientError::Ua(UaError::new(
                fault.response_header.service_result,
                "GetEndpoints failed",
            ))),
            other => Err(ClientError::Ua(UaError::new(
                status::BAD_TCP_INTERNAL_ERROR,
                format!("unexpected response to GetEndpoints: {other:?}"),
            ))),
        }
    }
}
