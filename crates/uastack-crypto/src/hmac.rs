//! HMAC-SHA256 message authentication.
//!
//! Provides HMAC-SHA256 computation and constant-time verification using the
//! `hmac` crate with `sha2::Sha256`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// The HMAC-SHA256 output length in bytes.
pub const MAC_SIZE: usize = 32;

/// Compute the HMAC-SHA256 of `data` using the given `key`.
#[must_use]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verify that the HMAC-SHA256 of `data` under `key` matches `expected`.
///
/// The comparison is performed in constant time by the underlying `hmac`
/// crate.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidMac`] if the MAC does not match.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(data);
    mac.verify_slice(expected).map_err(|_| CryptoError::InvalidMac)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2.
    #[test]
    fn rfc4231_case_2() {
        let key = b"Jefe";
        let data = b"what do ya want for nothing?";
        let digest = hmac_sha256(key, data);
        let expected =
            hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());
    }

    #[test]
    fn verify_roundtrip() {
        let key = [0xCC; 32];
        let mac = hmac_sha256(&key, b"payload");
        assert!(hmac_sha256_verify(&key, b"payload", &mac).is_ok());
    }

    #[test]
    fn verify_rejects_corrupted_mac() {
        let key = [0xCC; 32];
        let mut mac = hmac_sha256(&key, b"payload");
        mac[0] ^= 0xFF;
        assert_eq!(
            hmac_sha256_verify(&key, b"payload", &mac),
            Err(CryptoError::InvalidMac)
        );
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let mac = hmac_sha256(&[0xAA; 32], b"data");
        assert_eq!(
            hmac_sha256_verify(&[0xBB; 32], b"data", &mac),
            Err(CryptoError::InvalidMac)
        );
    }

    #[test]
    fn verify_rejects_wrong_data() {
        let key = [0xDD; 32];
        let mac = hmac_sha256(&key, b"data A");
        assert_eq!(
            hmac_sha256_verify(&key, b"data B", &mac),
            Err(CryptoError::InvalidMac)
        );
    }
}
