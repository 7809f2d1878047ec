//! Security policies and certificate handling.

pub mod basic256;
pub mod certificate;
pub mod none;
pub mod policy;

use std::sync::Arc;

pub use basic256::Basic256Sha256;
pub use certificate::{ApplicationKeyPair, PeerCertificate, CERTIFICATE_SIZE};
pub use none::NonePolicy;
pub use policy::{
    ChannelKeys, MessageSecurityMode, SecurityPolicy, SecurityProfile, SymmetricKeys,
};

use crate::error::UaError;
use crate::status;

/// Resolve a policy URI received in an asymmetric security header.
pub fn policy_from_uri(uri: &str) -> Result<Arc<dyn SecurityPolicy>, UaError> {
    match uri {
        none::URI => Ok(Arc::new(NonePolicy)),
        basic256::URI => Ok(Arc::new(Basic256Sha256)),
        _ => Err(UaError::new(
            status::BAD_SECURITY_POLICY_REJECTED,
            format!("unsupported security policy: {uri}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_resolution() {
        assert_eq!(policy_from_uri(none::URI).unwrap().uri(), none::URI);
        assert_eq!(policy_from_uri(basic256::URI).unwrap().uri(), basic256::URI);
        assert!(policy_from_uri("http://example.com/unknown").is_err());
    }
}
