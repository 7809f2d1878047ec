//! Transport error type.
//!
//! Every failure in the transport layer carries an OPC UA [`StatusCode`] and
//! a human-readable message. Fatal errors close the connection; message-level
//! errors ([`UaError::is_fatal`] = false) fail a single request only.

use core::fmt;

use uastack_crypto::CryptoError;

use crate::status::{self, StatusCode};

/// A transport-layer error: a status code plus context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UaError {
    pub code: StatusCode,
    pub message: String,
}

impl UaError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for an error whose message is the code's name.
    pub fn from_code(code: StatusCode) -> Self {
        Self {
            message: code.to_string(),
            code,
        }
    }

}

impl fmt::Display for UaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for UaError {}

impl From<CryptoError> for UaError {
    fn from(e: CryptoError) -> Self {
        UaError::new(status::BAD_SECURITY_CHECKS_FAILED, e.to_string())
    }
}

impl From<std::io::Error> for UaError {
    fn from(e: std::io::Error) -> Self {
        UaError::new(status::BAD_CONNECTION_CLOSED, e.to_string())
    }
}
