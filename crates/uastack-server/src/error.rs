//! Server error types.

use uastack_core::UaError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Ua(#[from] UaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server is not running")]
    NotRunning,

    #[error("server is already running")]
    AlreadyRunning,
}
