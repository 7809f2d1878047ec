//! The `None` security policy: no signatures, no encryption, empty nonces.

use crate::error::UaError;
use crate::security::certificate::ApplicationKeyPair;
use crate::security::policy::{
    ChannelKeys, MessageSecurityMode, SecurityPolicy, SecurityProfile, SymmetricKeys,
};
use crate::status;

pub const URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

/// Policy that leaves every chunk in the clear.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonePolicy;

fn empty_keys() -> SymmetricKeys {
    SymmetricKeys {
        signing_key: Vec::new(),
        encryption_key: Vec::new(),
        iv: Vec::new(),
    }
}

fn unsupported(operation: &str) -> UaError {
    UaError::new(
        status::BAD_SECURITY_POLICY_REJECTED,
        format!("{operation} is not available under the None security policy"),
    )
}

impl SecurityPolicy for NonePolicy {
    fn uri(&self) -> &'static str {
        URI
    }

    fn nonce_length(&self) -> usize {
        0
    }

    fn symmetric_profile(&self, _mode: MessageSecurityMode) -> SecurityProfile {
        SecurityProfile::PLAIN
    }

    fn asymmetric_profile(&self) -> SecurityProfile {
        SecurityProfile::PLAIN
    }

    fn derive_keys(&self, _client_nonce: &[u8], _server_nonce: &[u8]) -> ChannelKeys {
        ChannelKeys {
            client: empty_keys(),
            server: empty_keys(),
        }
    }

    fn symmetric_sign(&self, _keys: &SymmetricKeys, _data: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn symmetric_verify(
        &self,
        _keys: &SymmetricKeys,
        _data: &[u8],
        _signature: &[u8],
    ) -> Result<(), UaError> {
        Ok(())
    }

    fn symmetric_encrypt(&self, _keys: &SymmetricKeys, data: &[u8]) -> Result<Vec<u8>, UaError> {
        Ok(data.to_vec())
    }

    fn symmetric_decrypt(&self, _keys: &SymmetricKeys, data: &[u8]) -> Result<Vec<u8>, UaError> {
        Ok(data.to_vec())
    }

    fn asymmetric_sign(
        &self,
        _keys: &ApplicationKeyPair,
        _data: &[u8],
    ) -> Result<Vec<u8>, UaError> {
        Err(unsupported("asymmetric signing"))
    }

    fn asymmetric_verify(
        &self,
        _certificate: &[u8],
        _data: &[u8],
        _signature: &[u8],
    ) -> Result<(), UaError> {
        Err(unsupported("asymmetric verification"))
    }

    fn asymmetric_encrypt(&self, _certificate: &[u8], _data: &[u8]) -> Result<Vec<u8>, UaError> {
        Err(unsupported("asymmetric encryption"))
    }

    fn asymmetric_decrypt(
        &self,
        _keys: &ApplicationKeyPair,
        _data: &[u8],
    ) -> Result<Vec<u8>, UaError> {
        Err(unsupported("asymmetric decryption"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_plain() {
        let policy = NonePolicy;
        for mode in [
            MessageSecurityMode::None,
            MessageSecurityMode::Sign,
            MessageSecurityMode::SignAndEncrypt,
        ] {
            assert_eq!(policy.symmetric_profile(mode), SecurityProfile::PLAIN);
        }
        assert_eq!(policy.asymmetric_profile(), SecurityProfile::PLAIN);
    }

    #[test]
    fn encryption_is_identity() {
        let policy = NonePolicy;
        let keys = empty_keys();
        let data = b"clear text".to_vec();
        assert_eq!(policy.symmetric_encrypt(&keys, &data).unwrap(), data);
        assert_eq!(policy.symmetric_decrypt(&keys, &data).unwrap(), data);
    }

    #[test]
    fn asymmetric_operations_rejected() {
        let policy = NonePolicy;
        assert!(policy.asymmetric_encrypt(&[], &[]).is_err());
        assert!(policy.asymmetric_verify(&[], &[], &[]).is_err());
    }

    #[test]
    fn nonce_is_empty() {
        assert_eq!(NonePolicy.nonce_length(), 0);
    }
}
