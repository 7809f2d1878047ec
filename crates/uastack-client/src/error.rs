//! Client error types.

use uastack_core::{StatusCode, UaError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Ua(#[from] UaError),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpointUrl(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("client stopped")]
    Stopped,
}

impl ClientError {
    /// The OPC UA status code behind this error, when there is one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Ua(e) => Some(e.code),
            _ => None,
        }
    }
}

impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Ua(e) => ClientError::Ua(e.clone()),
            ClientError::InvalidEndpointUrl(url) => ClientError::InvalidEndpointUrl(url.clone()),
            ClientError::Io(e) => ClientError::Io(std::io::Error::new(e.kind(), e.to_string())),
            ClientError::ConnectTimeout => ClientError::ConnectTimeout,
            ClientError::Stopped => ClientError::Stopped,
        }
    }
}
