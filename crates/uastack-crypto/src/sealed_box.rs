//! Authenticated public-key encryption ("sealed box").
//!
//! Seals a block-aligned payload to a receiver's X25519 public key: an
//! ephemeral keypair is generated per box, ECDH against the receiver key is
//! expanded with [`crate::psha::p_sha256`] into an AES-256 key and an HMAC
//! key, and the payload travels as
//!
//! ```text
//! [ephemeral public key: 32] || [IV: 16] || [ciphertext] || [HMAC-SHA256: 32]
//! ```
//!
//! The MAC covers everything before it. The payload must already be a
//! non-empty multiple of 16 bytes (callers own the padding), so a sealed
//! box is always exactly `plaintext length + SEALED_OVERHEAD` bytes.

use rand::RngCore;

use crate::aes_cbc::{aes256_cbc_decrypt, aes256_cbc_encrypt, BLOCK_SIZE};
use crate::hmac::{hmac_sha256, hmac_sha256_verify, MAC_SIZE};
use crate::psha::p_sha256;
use crate::x25519::{X25519PrivateKey, X25519PublicKey};
use crate::CryptoError;

/// Fixed per-box overhead: ephemeral key + IV + MAC.
pub const SEALED_OVERHEAD: usize = 32 + 16 + MAC_SIZE;

/// Seal a block-aligned `plaintext` to `receiver`'s public key.
///
/// # Errors
///
/// Returns [`CryptoError::NotBlockAligned`] if `plaintext` is empty or not a
/// multiple of 16 bytes.
pub fn seal(receiver: &X25519PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = X25519PrivateKey::generate();
    let ephemeral_public = ephemeral.public_key().to_bytes();

    let (signing_key, encryption_key) = derive_box_keys(
        &ephemeral.diffie_hellman(receiver),
        &ephemeral_public,
        &receiver.to_bytes(),
    );

    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = aes256_cbc_encrypt(&encryption_key, &iv, plaintext)?;

    let mut out = Vec::with_capacity(plaintext.len() + SEALED_OVERHEAD);
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    let mac = hmac_sha256(&signing_key, &out);
    out.extend_from_slice(&mac);
    Ok(out)
}

/// Open a sealed box with the receiver's private key, returning the
/// block-aligned plaintext.
///
/// # Errors
///
/// Returns [`CryptoError::SealedBoxInvalid`] if the box is too short and
/// [`CryptoError::InvalidMac`] if the MAC does not verify.
pub fn open(receiver: &X25519PrivateKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEALED_OVERHEAD + BLOCK_SIZE {
        return Err(CryptoError::SealedBoxInvalid);
    }

    let ephemeral_public: [u8; 32] = sealed[..32].try_into().expect("checked length");
    let iv: [u8; 16] = sealed[32..48].try_into().expect("checked length");
    let mac_start = sealed.len() - MAC_SIZE;
    let ciphertext = &sealed[48..mac_start];

    let ephemeral = X25519PublicKey::from_bytes(ephemeral_public)?;
    let (signing_key, encryption_key) = derive_box_keys(
        &receiver.diffie_hellman(&ephemeral),
        &ephemeral_public,
        &receiver.public_key().to_bytes(),
    );

    hmac_sha256_verify(&signing_key, &sealed[..mac_start], &sealed[mac_start..])?;

    aes256_cbc_decrypt(&encryption_key, &iv, ciphertext)
        .map_err(|_| CryptoError::SealedBoxInvalid)
}

/// Expand an ECDH shared secret into (signing key, encryption key).
fn derive_box_keys(
    shared: &[u8; 32],
    ephemeral_public: &[u8; 32],
    receiver_public: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(ephemeral_public);
    seed.extend_from_slice(receiver_public);

    let material = p_sha256(shared, &seed, 64);
    let mut signing_key = [0u8; 32];
    let mut encryption_key = [0u8; 32];
    signing_key.copy_from_slice(&material[..32]);
    encryption_key.copy_from_slice(&material[32..]);
    (signing_key, encryption_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let receiver = X25519PrivateKey::generate();

        for blocks in [1, 2, 4, 16] {
            let plaintext: Vec<u8> = (0..blocks * BLOCK_SIZE).map(|i| (i & 0xFF) as u8).collect();
            let sealed = seal(&receiver.public_key(), &plaintext).unwrap();
            assert_eq!(sealed.len(), plaintext.len() + SEALED_OVERHEAD);

            let opened = open(&receiver, &sealed).unwrap();
            assert_eq!(opened, plaintext, "roundtrip mismatch for {blocks} blocks");
        }
    }

    #[test]
    fn seal_rejects_unaligned_plaintext() {
        let receiver = X25519PrivateKey::generate();
        assert!(seal(&receiver.public_key(), &[0u8; 15]).is_err());
        assert!(seal(&receiver.public_key(), &[]).is_err());
    }

    #[test]
    fn open_rejects_wrong_receiver() {
        let receiver = X25519PrivateKey::generate();
        let other = X25519PrivateKey::generate();

        let sealed = seal(&receiver.public_key(), &[0x5A; 32]).unwrap();
        assert!(open(&other, &sealed).is_err());
    }

    #[test]
    fn open_rejects_corrupted_ciphertext() {
        let receiver = X25519PrivateKey::generate();
        let mut sealed = seal(&receiver.public_key(), &[0x5A; 32]).unwrap();

        sealed[50] ^= 0x01;
        assert_eq!(open(&receiver, &sealed), Err(CryptoError::InvalidMac));
    }

    #[test]
    fn open_rejects_corrupted_mac() {
        let receiver = X25519PrivateKey::generate();
        let mut sealed = seal(&receiver.public_key(), &[0x5A; 32]).unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(open(&receiver, &sealed), Err(CryptoError::InvalidMac));
    }

    #[test]
    fn open_rejects_truncated_box() {
        let receiver = X25519PrivateKey::generate();
        assert_eq!(
            open(&receiver, &[0u8; SEALED_OVERHEAD]),
            Err(CryptoError::SealedBoxInvalid)
        );
    }

    #[test]
    fn boxes_are_randomized() {
        let receiver = X25519PrivateKey::generate();
        let a = seal(&receiver.public_key(), &[0x11; 16]).unwrap();
        let b = seal(&receiver.public_key(), &[0x11; 16]).unwrap();
        assert_ne!(a, b);
    }
}
