//! The `Basic256Sha256` security policy.
//!
//! Symmetric protection follows the OPC UA profile of the same name:
//! P_SHA256 stretches the exchanged 32-byte nonces into per-direction
//! signing keys, AES-256 keys, and IVs; chunks are signed with HMAC-SHA256
//! and encrypted with AES-256-CBC. Asymmetric (handshake) protection is
//! keyed on the 64-byte certificate bundle: Ed25519 signatures and an
//! X25519 sealed box in place of the RSA primitives, with identical layout
//! semantics; the codec only sees the profile sizes.

use uastack_crypto::aes_cbc::{aes256_cbc_decrypt, aes256_cbc_encrypt, BLOCK_SIZE};
use uastack_crypto::ed25519::SIGNATURE_SIZE as ED25519_SIGNATURE_SIZE;
use uastack_crypto::hmac::{hmac_sha256, hmac_sha256_verify, MAC_SIZE};
use uastack_crypto::psha::p_sha256;
use uastack_crypto::sealed_box::{self, SEALED_OVERHEAD};

use crate::error::UaError;
use crate::security::certificate::{ApplicationKeyPair, PeerCertificate};
use crate::security::policy::{
    ChannelKeys, MessageSecurityMode, SecurityPolicy, SecurityProfile, SymmetricKeys,
};
use crate::status;

pub const URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

/// Nonce length mandated by the profile.
pub const NONCE_LENGTH: usize = 32;

/// Per-direction derived material: signing key + encryption key + IV.
const DERIVED_SIGNING_KEY_SIZE: usize = 32;
const DERIVED_ENCRYPTION_KEY_SIZE: usize = 32;
const DERIVED_IV_SIZE: usize = 16;
const DERIVED_MATERIAL_SIZE: usize =
    DERIVED_SIGNING_KEY_SIZE + DERIVED_ENCRYPTION_KEY_SIZE + DERIVED_IV_SIZE;

#[derive(Debug, Default, Clone, Copy)]
pub struct Basic256Sha256;

impl Basic256Sha256 {
    fn key_array(keys: &SymmetricKeys) -> Result<([u8; 32], [u8; 16]), UaError> {
        let encryption_key: [u8; 32] = keys.encryption_key.as_slice().try_into().map_err(|_| {
            UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "derived encryption key has wrong length",
            )
        })?;
        let iv: [u8; 16] = keys.iv.as_slice().try_into().map_err(|_| {
            UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "derived IV has wrong length",
            )
        })?;
        Ok((encryption_key, iv))
    }
}

/// Split one direction's P_SHA256 output into its key components.
fn split_material(material: Vec<u8>) -> SymmetricKeys {
    SymmetricKeys {
        signing_key: material[..DERIVED_SIGNING_KEY_SIZE].to_vec(),
        encryption_key: material
            [DERIVED_SIGNING_KEY_SIZE..DERIVED_SIGNING_KEY_SIZE + DERIVED_ENCRYPTION_KEY_SIZE]
            .to_vec(),
        iv: material[DERIVED_SIGNING_KEY_SIZE + DERIVED_ENCRYPTION_KEY_SIZE..].to_vec(),
    }
}

impl SecurityPolicy for Basic256Sha256 {
    fn uri(&self) -> &'static str {
        URI
    }

    fn nonce_length(&self) -> usize {
        NONCE_LENGTH
    }

    fn symmetric_profile(&self, mode: MessageSecurityMode) -> SecurityProfile {
        SecurityProfile {
            signature_size: if mode.is_signed() { MAC_SIZE } else { 0 },
            plain_block_size: if mode.is_encrypted() { BLOCK_SIZE } else { 1 },
            encryption_overhead: 0,
            is_signed: mode.is_signed(),
            is_encrypted: mode.is_encrypted(),
        }
    }

    fn asymmetric_profile(&self) -> SecurityProfile {
        SecurityProfile {
            signature_size: ED25519_SIGNATURE_SIZE,
            plain_block_size: BLOCK_SIZE,
            encryption_overhead: SEALED_OVERHEAD,
            is_signed: true,
            is_encrypted: true,
        }
    }

    fn derive_keys(&self, client_nonce: &[u8], server_nonce: &[u8]) -> ChannelKeys {
        // Keys protecting client→server traffic are seeded by the client
        // nonce under the server nonce, and vice versa.
        let client = p_sha256(server_nonce, client_nonce, DERIVED_MATERIAL_SIZE);
        let server = p_sha256(client_nonce, server_nonce, DERIVED_MATERIAL_SIZE);
        ChannelKeys {
            client: split_material(client),
            server: split_material(server),
        }
    }

    fn symmetric_sign(&self, keys: &SymmetricKeys, data: &[u8]) -> Vec<u8> {
        hmac_sha256(&keys.signing_key, data).to_vec()
    }

    fn symmetric_verify(
        &self,
        keys: &SymmetricKeys,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), UaError> {
        hmac_sha256_verify(&keys.signing_key, data, signature)
            .map_err(|_| UaError::new(status::BAD_SECURITY_CHECKS_FAILED, "chunk signature invalid"))
    }

    fn symmetric_encrypt(&self, keys: &SymmetricKeys, data: &[u8]) -> Result<Vec<u8>, UaError> {
        let (encryption_key, iv) = Self::key_array(keys)?;
        Ok(aes256_cbc_encrypt(&encryption_key, &iv, data)?)
    }

    fn symmetric_decrypt(&self, keys: &SymmetricKeys, data: &[u8]) -> Result<Vec<u8>, UaError> {
        let (encryption_key, iv) = Self::key_array(keys)?;
        Ok(aes256_cbc_decrypt(&encryption_key, &iv, data)?)
    }

    fn asymmetric_sign(&self, keys: &ApplicationKeyPair, data: &[u8]) -> Result<Vec<u8>, UaError> {
        Ok(keys.signing.sign(data).to_vec())
    }

    fn asymmetric_verify(
        &self,
        certificate: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), UaError> {
        let peer = PeerCertificate::parse(certificate)?;
        peer.signing.verify(data, signature).map_err(|_| {
            UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "handshake signature invalid",
            )
        })
    }

    fn asymmetric_encrypt(&self, certificate: &[u8], data: &[u8]) -> Result<Vec<u8>, UaError> {
        let peer = PeerCertificate::parse(certificate)?;
        Ok(sealed_box::seal(&peer.encryption, data)?)
    }

    fn asymmetric_decrypt(
        &self,
        keys: &ApplicationKeyPair,
        data: &[u8],
    ) -> Result<Vec<u8>, UaError> {
        Ok(sealed_box::open(&keys.encryption, data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonces() -> (Vec<u8>, Vec<u8>) {
        (vec![0x11; NONCE_LENGTH], vec![0x22; NONCE_LENGTH])
    }

    #[test]
    fn derived_keys_have_profile_sizes() {
        let (client_nonce, server_nonce) = nonces();
        let keys = Basic256Sha256.derive_keys(&client_nonce, &server_nonce);

        for dir in [&keys.client, &keys.server] {
            assert_eq!(dir.signing_key.len(), DERIVED_SIGNING_KEY_SIZE);
            assert_eq!(dir.encryption_key.len(), DERIVED_ENCRYPTION_KEY_SIZE);
            assert_eq!(dir.iv.len(), DERIVED_IV_SIZE);
        }
        assert_ne!(keys.client, keys.server);
    }

    #[test]
    fn both_sides_derive_identical_keys() {
        let (client_nonce, server_nonce) = nonces();
        let a = Basic256Sha256.derive_keys(&client_nonce, &server_nonce);
        let b = Basic256Sha256.derive_keys(&client_nonce, &server_nonce);
        assert_eq!(a.client, b.client);
        assert_eq!(a.server, b.server);
    }

    #[test]
    fn symmetric_sign_verify_roundtrip() {
        let (client_nonce, server_nonce) = nonces();
        let keys = Basic256Sha256.derive_keys(&client_nonce, &server_nonce);

        let sig = Basic256Sha256.symmetric_sign(&keys.client, b"chunk bytes");
        assert_eq!(sig.len(), MAC_SIZE);
        assert!(Basic256Sha256
            .symmetric_verify(&keys.client, b"chunk bytes", &sig)
            .is_ok());
        assert!(Basic256Sha256
            .symmetric_verify(&keys.server, b"chunk bytes", &sig)
            .is_err());
    }

    #[test]
    fn symmetric_encrypt_decrypt_roundtrip() {
        let (client_nonce, server_nonce) = nonces();
        let keys = Basic256Sha256.derive_keys(&client_nonce, &server_nonce);

        let plain = vec![0x5A; 64];
        let cipher = Basic256Sha256.symmetric_encrypt(&keys.client, &plain).unwrap();
        assert_eq!(cipher.len(), plain.len());
        assert_ne!(cipher, plain);

        let recovered = Basic256Sha256.symmetric_decrypt(&keys.client, &cipher).unwrap();
        assert_eq!(recovered, plain);
    }

    #[test]
    fn asymmetric_roundtrip_via_certificates() {
        let server_keys = ApplicationKeyPair::generate();
        let server_cert = server_keys.certificate();

        let plain = vec![0x33; 32];
        let sealed = Basic256Sha256.asymmetric_encrypt(&server_cert, &plain).unwrap();
        assert_eq!(sealed.len(), plain.len() + SEALED_OVERHEAD);

        let opened = Basic256Sha256.asymmetric_decrypt(&server_keys, &sealed).unwrap();
        assert_eq!(opened, plain);

        let client_keys = ApplicationKeyPair::generate();
        let sig = Basic256Sha256.asymmetric_sign(&client_keys, b"opn chunk").unwrap();
        assert!(Basic256Sha256
            .asymmetric_verify(&client_keys.certificate(), b"opn chunk", &sig)
            .is_ok());
        assert!(Basic256Sha256
            .asymmetric_verify(&server_cert, b"opn chunk", &sig)
            .is_err());
    }

    #[test]
    fn profiles_match_modes() {
        let p = Basic256Sha256.symmetric_profile(MessageSecurityMode::Sign);
        assert_eq!(p.signature_size, MAC_SIZE);
        assert!(!p.is_encrypted);
        assert_eq!(p.plain_block_size, 1);

        let p = Basic256Sha256.symmetric_profile(MessageSecurityMode::SignAndEncrypt);
        assert!(p.is_encrypted);
        assert_eq!(p.plain_block_size, BLOCK_SIZE);

        let p = Basic256Sha256.asymmetric_profile();
        assert!(p.is_signed && p.is_encrypted);
        assert_eq!(p.encryption_overhead, SEALED_OVERHEAD);
    }
}
