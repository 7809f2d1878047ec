//! P_SHA256 key expansion (hand-rolled over [`crate::hmac::hmac_sha256`]).
//!
//! Implements the TLS-style pseudo-random function the OPC UA key-derivation
//! profile uses to stretch the exchanged nonces into signing keys, encryption
//! keys, and initialization vectors:
//!
//! ```text
//! A(0) = seed
//! A(i) = HMAC-SHA256(secret, A(i-1))
//! P_SHA256(secret, seed) = HMAC(secret, A(1) || seed) ||
//!                          HMAC(secret, A(2) || seed) || ...
//! ```
//!
//! Each side derives its remote keys with `secret = local nonce,
//! seed = remote nonce` and its local keys with the roles swapped.

use crate::hmac::hmac_sha256;

/// The SHA-256 hash output length in bytes.
const HASH_LEN: usize = 32;

/// Expand `secret` and `seed` into `length` bytes of keying material.
#[must_use]
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
    let num_blocks = length.div_ceil(HASH_LEN);
    let mut derived = Vec::with_capacity(num_blocks * HASH_LEN);

    // A(i), starting from A(0) = seed.
    let mut a: Vec<u8> = seed.to_vec();

    for _ in 0..num_blocks {
        a = hmac_sha256(secret, &a).to_vec();

        let mut input = Vec::with_capacity(a.len() + seed.len());
        input.extend_from_slice(&a);
        input.extend_from_slice(seed);

        derived.extend_from_slice(&hmac_sha256(secret, &input));
    }

    derived.truncate(length);
    derived
}
