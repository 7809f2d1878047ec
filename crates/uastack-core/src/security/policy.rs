//! The security policy seam.
//!
//! The chunk pipeline never touches a cipher directly; it consumes a
//! [`SecurityPolicy`] for sizes, key derivation, signing/verification, and
//! encryption/decryption: symmetric under the channel's derived keys,
//! asymmetric keyed on certificates during the OPN handshake. Policies with
//! different primitives (an RSA profile, for instance) drop in behind this
//! trait without changes to the codec.

use crate::error::UaError;

/// How MSG chunks on a channel are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

impl MessageSecurityMode {
    #[must_use]
    pub fn is_signed(self) -> bool {
        !matches!(self, MessageSecurityMode::None)
    }

    #[must_use]
    pub fn is_encrypted(self) -> bool {
        matches!(self, MessageSecurityMode::SignAndEncrypt)
    }

    /// Wire encoding (the enumerated value of the data model).
    #[must_use]
    pub fn to_u32(self) -> u32 {
        match self {
            MessageSecurityMode::None => 1,
            MessageSecurityMode::Sign => 2,
            MessageSecurityMode::SignAndEncrypt => 3,
        }
    }

    pub fn from_u32(v: u32) -> Result<Self, UaError> {
        match v {
            1 => Ok(MessageSecurityMode::None),
            2 => Ok(MessageSecurityMode::Sign),
            3 => Ok(MessageSecurityMode::SignAndEncrypt),
            _ => Err(UaError::new(
                crate::status::BAD_SECURITY_MODE_REJECTED,
                format!("unknown security mode: {v}"),
            )),
        }
    }
}

/// One direction's symmetric keying material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKeys {
    pub signing_key: Vec<u8>,
    pub encryption_key: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Both directions' symmetric keys, derived from the handshake nonces.
/// `client` protects client→server traffic, `server` the reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKeys {
    pub client: SymmetricKeys,
    pub server: SymmetricKeys,
}

/// Sizing parameters the chunk codec needs to lay out one protected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityProfile {
    /// Signature appended to the chunk; 0 when unsigned.
    pub signature_size: usize,
    /// Plaintext block granularity; 1 when unencrypted.
    pub plain_block_size: usize,
    /// Bytes the cipher adds on top of the plaintext; 0 for size-preserving
    /// symmetric encryption.
    pub encryption_overhead: usize,
    /// Whether a signature is present.
    pub is_signed: bool,
    /// Whether the region is encrypted (and therefore padded).
    pub is_encrypted: bool,
}

impl SecurityProfile {
    /// Profile of a wholly unprotected chunk.
    pub const PLAIN: SecurityProfile = SecurityProfile {
        signature_size: 0,
        plain_block_size: 1,
        encryption_overhead: 0,
        is_signed: false,
        is_encrypted: false,
    };
}

/// A security policy: the algorithm suite protecting one channel.
pub trait SecurityPolicy: Send + Sync {
    /// The policy URI carried in asymmetric security headers.
    fn uri(&self) -> &'static str;

    /// Length of the random nonces exchanged in the OPN handshake.
    fn nonce_length(&self) -> usize;

    /// Sizing for MSG chunks under the given mode.
    fn symmetric_profile(&self, mode: MessageSecurityMode) -> SecurityProfile;

    /// Sizing for OPN chunks (always signed and encrypted unless the policy
    /// itself is `None`).
    fn asymmetric_profile(&self) -> SecurityProfile;

    /// Derive both directions' symmetric keys from the exchanged nonces.
    fn derive_keys(&self, client_nonce: &[u8], server_nonce: &[u8]) -> ChannelKeys;

    /// Sign `data` with a direction's symmetric signing key.
    fn symmetric_sign(&self, keys: &SymmetricKeys, data: &[u8]) -> Vec<u8>;

    /// Verify a symmetric signature.
    fn symmetric_verify(
        &self,
        keys: &SymmetricKeys,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), UaError>;

    /// Encrypt a block-aligned region with a direction's symmetric keys.
    fn symmetric_encrypt(&self, keys: &SymmetricKeys, data: &[u8]) -> Result<Vec<u8>, UaError>;

    /// Decrypt a region with a direction's symmetric keys.
    fn symmetric_decrypt(&self, keys: &SymmetricKeys, data: &[u8]) -> Result<Vec<u8>, UaError>;

    /// Sign `data` with the local application keypair.
    fn asymmetric_sign(&self, keys: &ApplicationKeyPair, data: &[u8]) -> Result<Vec<u8>, UaError>;

    /// Verify an asymmetric signature against the sender's certificate.
    fn asymmetric_verify(
        &self,
        certificate: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), UaError>;

    /// Encrypt a block-aligned region to the receiver's certificate.
    fn asymmetric_encrypt(&self, certificate: &[u8], data: &[u8]) -> Result<Vec<u8>, UaError>;

    /// Decrypt a region with the local application keypair.
    fn asymmetric_decrypt(
        &self,
        keys: &ApplicationKeyPair,
        data: &[u8],
    ) -> Result<Vec<u8>, UaError>;
}

pub use crate::security::certificate::ApplicationKeyPair;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_predicates() {
        assert!(!MessageSecurityMode::None.is_signed());
        assert!(!MessageSecurityMode::None.is_encrypted());
        assert!(MessageSecurityMode::Sign.is_signed());
        assert!(!MessageSecurityMode::Sign.is_encrypted());
        assert!(MessageSecurityMode::SignAndEncrypt.is_signed());
        assert!(MessageSecurityMode::SignAndEncrypt.is_encrypted());
    }

    #[test]
    fn mode_wire_roundtrip() {
        for mode in [
            MessageSecurityMode::None,
            MessageSecurityMode::Sign,
            MessageSecurityMode::SignAndEncrypt,
        ] {
            assert_eq!(MessageSecurityMode::from_u32(mode.to_u32()).unwrap(), mode);
        }
        assert!(MessageSecurityMode::from_u32(0).is_err());
        assert!(MessageSecurityMode::from_u32(4).is_err());
    }
}
