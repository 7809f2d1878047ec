//! AES-256-CBC encryption and decryption over block-aligned data.
//!
//! The OPC UA secure conversation applies its own padding inside the chunk
//! layout (padding-size byte plus repeated filler), so the cipher layer
//! operates strictly on 16-byte-aligned buffers and never pads.

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// The AES cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Encrypt `plaintext` with AES-256-CBC using the given `key` and `iv`.
///
/// # Errors
///
/// Returns [`CryptoError::NotBlockAligned`] if `plaintext` is empty or not a
/// multiple of 16 bytes. Callers are responsible for padding first.
pub fn aes256_cbc_encrypt(
    key: &[u8; 32],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.is_empty() || plaintext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::NotBlockAligned {
            block_size: BLOCK_SIZE,
            actual: plaintext.len(),
        });
    }

    let encryptor = Aes256CbcEnc::new(key.into(), iv.into());
    let mut out = vec![0u8; plaintext.len()];
    encryptor
        .encrypt_padded_b2b_mut::<NoPadding>(plaintext, &mut out)
        .expect("output buffer is block-aligned and same size as input");
    Ok(out)
}

/// Decrypt `ciphertext` with AES-256-CBC using the given `key` and `iv`.
///
/// Returns the raw decrypted bytes; any protocol-level padding is still in
/// place and must be stripped by the caller.
///
/// # Errors
///
/// Returns [`CryptoError::NotBlockAligned`] if `ciphertext` is empty or not
/// a multiple of 16 bytes.
pub fn aes256_cbc_decrypt(
    key: &[u8; 32],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::NotBlockAligned {
            block_size: BLOCK_SIZE,
            actual: ciphertext.len(),
        });
    }

    let decryptor = Aes256CbcDec::new(key.into(), iv.into());
    let mut buf = ciphertext.to_vec();
    decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::NotBlockAligned {
            block_size: BLOCK_SIZE,
            actual: ciphertext.len(),
        })?;
    Ok(buf)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn cbc_roundtrip(
            key in any::<[u8; 32]>(),
            iv in any::<[u8; 16]>(),
            blocks in 1usize..32,
            seed in any::<u8>(),
        ) {
            let data: Vec<u8> = (0..blocks * BLOCK_SIZE)
                .map(|i| (i as u8).wrapping_add(seed))
                .collect();
            let ciphertext = aes256_cbc_encrypt(&key, &iv, &data).unwrap();
            let recovered = aes256_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
            prop_assert_eq!(&recovered, &data);
        }
    }
}
