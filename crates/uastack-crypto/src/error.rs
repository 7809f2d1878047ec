//! Error type for the uastack-crypto crate.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext is empty or not a multiple of the cipher block size.
    NotBlockAligned { block_size: usize, actual: usize },
    /// A key or nonce had the wrong length.
    InvalidKeyLength { expected: usize, actual: usize },
    /// An HMAC did not verify.
    InvalidMac,
    /// An Ed25519 signature did not verify.
    InvalidSignature,
    /// A public key was not a valid curve point.
    InvalidPublicKey,
    /// A sealed box was too short or failed to open.
    SealedBoxInvalid,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::NotBlockAligned { block_size, actual } => {
                write!(
                    f,
                    "data not block-aligned: {actual} bytes is not a non-zero multiple of {block_size}"
                )
            }
            CryptoError::InvalidKeyLength { expected, actual } => {
                write!(f, "invalid key length: expected {expected}, got {actual}")
            }
            CryptoError::InvalidMac => write!(f, "MAC verification failed"),
            CryptoError::InvalidSignature => write!(f, "signature verification failed"),
            CryptoError::InvalidPublicKey => write!(f, "invalid public key"),
            CryptoError::SealedBoxInvalid => write!(f, "sealed box malformed or failed to open"),
        }
    }
}

impl std::error::Error for CryptoError {}
