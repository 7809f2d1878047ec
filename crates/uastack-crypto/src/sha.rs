//! SHA-256 hashing and certificate thumbprints.

use sha2::{Digest, Sha256};

/// Length of a certificate thumbprint in bytes.
pub const THUMBPRINT_SIZE: usize = 20;

/// Compute the SHA-256 hash of the given data.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute a certificate thumbprint: SHA-256 truncated to the first 20 bytes.
#[must_use]
pub fn thumbprint(certificate: &[u8]) -> [u8; THUMBPRINT_SIZE] {
    let full = sha256(certificate);
    let mut out = [0u8; THUMBPRINT_SIZE];
    out.copy_from_slice(&full[..THUMBPRINT_SIZE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_empty_vector() {
        // FIPS 180-4 test vector for the empty message.
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(sha256(&[]).as_slice(), expected.as_slice());
    }

    #[test]
    fn sha256_abc_vector() {
        let expected =
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap();
        assert_eq!(sha256(b"abc").as_slice(), expected.as_slice());
    }

    #[test]
    fn thumbprint_is_prefix_of_digest() {
        let cert = b"some certificate bytes";
        let tp = thumbprint(cert);
        assert_eq!(tp.as_slice(), &sha256(cert)[..THUMBPRINT_SIZE]);
    }
}
