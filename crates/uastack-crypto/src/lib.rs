//! Cryptographic primitives for the uastack OPC UA transport stack.
//!
//! This crate provides the raw operations the security policies are built
//! from: AES-256-CBC block encryption, HMAC-SHA256 signing, SHA-256 digests
//! and certificate thumbprints, the P_SHA256 key-expansion function, and the
//! Curve25519 asymmetric suite (Ed25519 signatures, X25519 sealed boxes).
//!
//! Policy-level decisions (which algorithm protects which chunk region, how
//! padding is laid out on the wire) live in `uastack-core`; everything here
//! is policy-agnostic.

pub mod aes_cbc;
pub mod ed25519;
pub mod error;
pub mod hmac;
pub mod psha;
pub mod sealed_box;
pub mod sha;
pub mod x25519;

pub use error::CryptoError;
