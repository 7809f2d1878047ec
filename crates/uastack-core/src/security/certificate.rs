//! Application instance certificates.
//!
//! A certificate here is a 64-byte public-key bundle: an Ed25519 verifying
//! key for signatures followed by an X25519 key for encryption. Thumbprints
//! are SHA-256 truncated to 20 bytes. Trust management (who is allowed to
//! connect) is a layer above the transport and out of scope.

use uastack_crypto::ed25519::{Ed25519PrivateKey, Ed25519PublicKey};
use uastack_crypto::sha::{thumbprint, THUMBPRINT_SIZE};
use uastack_crypto::x25519::{X25519PrivateKey, X25519PublicKey};

use crate::error::UaError;
use crate::status;

/// Encoded certificate length: Ed25519 key + X25519 key.
pub const CERTIFICATE_SIZE: usize = 64;

/// The local application's private keys plus the derived certificate.
pub struct ApplicationKeyPair {
    pub signing: Ed25519PrivateKey,
    pub encryption: X25519PrivateKey,
}

impl ApplicationKeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: Ed25519PrivateKey::generate(),
            encryption: X25519PrivateKey::generate(),
        }
    }

    /// The certificate bytes advertised to peers.
    #[must_use]
    pub fn certificate(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CERTIFICATE_SIZE);
        out.extend_from_slice(&self.signing.public_key().to_bytes());
        out.extend_from_slice(&self.encryption.public_key().to_bytes());
        out
    }

    /// Thumbprint of the local certificate.
    #[must_use]
    pub fn certificate_thumbprint(&self) -> [u8; THUMBPRINT_SIZE] {
        thumbprint(&self.certificate())
    }
}

/// A peer's certificate, split into its component public keys.
#[derive(Debug)]
pub struct PeerCertificate {
    pub signing: Ed25519PublicKey,
    pub encryption: X25519PublicKey,
}

impl PeerCertificate {
    /// Parse a 64-byte certificate.
    ///
    /// # Errors
    ///
    /// `Bad_CertificateInvalid` when the length is wrong or the signing key
    /// is not a valid curve point.
    pub fn parse(certificate: &[u8]) -> Result<Self, UaError> {
        if certificate.len() != CERTIFICATE_SIZE {
            return Err(UaError::new(
                status::BAD_CERTIFICATE_INVALID,
                format!(
                    "certificate must be {CERTIFICATE_SIZE} bytes, got {}",
                    certificate.len()
                ),
            ));
        }
        let signing_bytes: [u8; 32] = certificate[..32].try_into().expect("checked length");
        let encryption_bytes: [u8; 32] = certificate[32..].try_into().expect("checked length");

        let signing = Ed25519PublicKey::from_bytes(signing_bytes)
            .map_err(|e| UaError::new(status::BAD_CERTIFICATE_INVALID, e.to_string()))?;
        let encryption = X25519PublicKey::from_bytes(encryption_bytes)
            .map_err(|e| UaError::new(status::BAD_CERTIFICATE_INVALID, e.to_string()))?;

        Ok(Self { signing, encryption })
    }
}
