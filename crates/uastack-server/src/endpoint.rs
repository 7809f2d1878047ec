//! The endpoint registry.
//!
//! An endpoint is a (url, security policy, security mode) tuple. The HELLO
//! handler validates the advertised url against this registry, the OPN
//! handler validates the requested policy/mode pair, and GetEndpoints
//! answers from it.

use std::sync::{Arc, Mutex};

use uastack_core::message::EndpointDescription;
use uastack_core::{MessageSecurityMode, SecurityPolicy};

/// One registered listener configuration.
#[derive(Clone)]
pub struct Endpoint {
    pub url: String,
    pub policy: Arc<dyn SecurityPolicy>,
    pub mode: MessageSecurityMode,
}

#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: Mutex<Vec<Endpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, url: impl Into<String>, policy: Arc<dyn SecurityPolicy>, mode: MessageSecurityMode) {
        self.endpoints.lock().expect("lock poisoned").push(Endpoint {
            url: url.into(),
            policy,
            mode,
        });
    }

    /// Whether any endpoint is registered at `url`.
    #[must_use]
    pub fn knows_url(&self, url: &str) -> bool {
        self.endpoints
            .lock()
            .expect("lock poisoned")
            .iter()
            .any(|e| e.url == url)
    }

    /// Find the endpoint matching a requested policy/mode pair.
    #[must_use]
    pub fn find(&self, policy_uri: &str, mode: MessageSecurityMode) -> Option<Endpoint> {
        self.endpoints
            .lock()
            .expect("lock poisoned")
            .iter()
            .find(|e| e.policy.uri() == policy_uri && e.mode == mode)
            .cloned()
    }

    /// Advertised endpoint descriptions for GetEndpoints.
    #[must_use]
    pub fn descriptions(&self, server_certificate: Option<&[u8]>) -> Vec<EndpointDescription> {
        self.endpoints
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|e| EndpointDescription {
                endpoint_url: e.url.clone(),
                security_policy_uri: e.policy.uri().to_string(),
                security_mode: e.mode,
                server_certificate: match e.mode {
                    MessageSecurityMode::None => None,
                    _ => server_certificate.map(<[u8]>::to_vec),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uastack_core::security::{Basic256Sha256, NonePolicy};

    fn registry() -> EndpointRegistry {
        let registry = EndpointRegistry::new();
        registry.add(
            "opc.tcp://localhost:12685/test",
            Arc::new(NonePolicy),
            MessageSecurityMode::None,
        );
        registry.add(
            "opc.tcp://localhost:12685/test",
            Arc::new(Basic256Sha256),
            MessageSecurityMode::SignAndEncrypt,
        );
        registry
    }

    #[test]
    fn url_lookup() {
        let registry = registry();
        assert!(registry.knows_url("opc.tcp://localhost:12685/test"));
        assert!(!registry.knows_url("opc.tcp://localhost:12685/other"));
    }

    #[test]
    fn policy_mode_lookup() {
        let registry = registry();
        assert!(registry
            .find(
                uastack_core::security::basic256::URI,
                MessageSecurityMode::SignAndEncrypt
            )
            .is_some());
        assert!(registry
            .find(uastack_core::security::basic256::URI, MessageSecurityMode::Sign)
            .is_none());
    }

    #[test]
    fn descriptions_carry_certificate_only_when_secured() {
        let registry = registry();
        let cert = vec![0xAA; 64];
        let descriptions = registry.descriptions(Some(&cert));
        assert_eq!(descriptions.len(), 2);
        assert_eq!(descriptions[0].server_certificate, None);
        assert_eq!(descriptions[1].server_certificate.as_ref(), Some(&cert));
    }
}
