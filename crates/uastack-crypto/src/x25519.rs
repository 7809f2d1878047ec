//! X25519 Diffie-Hellman key exchange.
//!
//! Newtype wrappers over `x25519-dalek` used by the sealed-box construction
//! that keys asymmetric chunk encryption on the receiver's certificate.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::CryptoError;

/// An X25519 private key (Curve25519 scalar).
pub struct X25519PrivateKey(StaticSecret);

impl X25519PrivateKey {
    /// Generate a random X25519 private key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::rngs::OsRng))
    }

    /// Create an X25519 private key from raw bytes.
    ///
    /// Clamping is applied internally by the underlying library when the key
    /// is used, so the bytes are stored as-is.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derive the corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange with another party's public key,
    /// returning the 32-byte shared secret.
    #[must_use]
    pub fn diffie_hellman(&self, their_public: &X25519PublicKey) -> [u8; 32] {
        *self.0.diffie_hellman(&their_public.0).as_bytes()
    }

    /// Extract the raw 32-byte private key material.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

/// An X25519 public key (Curve25519 group element).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    /// Create a public key from its 32-byte representation.
    ///
    /// Every 32-byte string is a valid Curve25519 u-coordinate, so this
    /// cannot fail; the `Result` keeps the signature uniform with
    /// [`crate::ed25519::Ed25519PublicKey::from_bytes`].
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self(PublicKey::from(bytes)))
    }

    /// Extract the 32-byte representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}
