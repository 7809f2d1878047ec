//! Security tokens and their rotation.
//!
//! A channel always has a `current` token and, after a renewal, a `previous`
//! one kept around to accept chunks already in flight. The previous token is
//! honoured until its lifetime plus a 25 % grace interval has elapsed, and
//! is dropped entirely on the next rotation.

use std::time::{Duration, Instant};

use crate::error::UaError;
use crate::security::ChannelKeys;
use crate::status;

/// One issued symmetric keying epoch.
#[derive(Debug)]
pub struct SecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub created_at: Instant,
    pub lifetime: Duration,
    pub keys: ChannelKeys,
}

impl SecurityToken {
    /// Whether the token has outlived its lifetime plus the 25 % grace
    /// interval granted to in-flight chunks.
    #[must_use]
    pub fn is_expired_beyond_grace(&self, now: Instant) -> bool {
        let grace = self.lifetime + self.lifetime / 4;
        now.duration_since(self.created_at) > grace
    }
}

/// The current/previous token pair of one channel.
pub struct ChannelSecurity {
    current: SecurityToken,
    previous: Option<SecurityToken>,
}

impl ChannelSecurity {
    pub fn new(token: SecurityToken) -> Self {
        Self {
            current: token,
            previous: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> &SecurityToken {
        &self.current
    }

    #[must_use]
    pub fn previous(&self) -> Option<&SecurityToken> {
        self.previous.as_ref()
    }

    /// Install a renewed token; the old current becomes previous and any
    /// older token is dropped.
    pub fn rotate(&mut self, token: SecurityToken) {
        let old = std::mem::replace(&mut self.current, token);
        self.previous = Some(old);
    }

    /// Resolve an incoming chunk's token id against current, then previous.
    ///
    /// # Errors
    ///
    /// `Bad_SecureChannelTokenUnknown` when the id matches neither live
    /// token, or matches only a previous token that has expired past its
    /// grace interval.
    pub fn validate_token_id(&self, token_id: u32, now: Instant) -> Result<&SecurityToken, UaError> {
        if token_id == self.current.token_id {
            return Ok(&self.current);
        }

        if let Some(previous) = &self.previous {
            if token_id == previous.token_id && !previous.is_expired_beyond_grace(now) {
                return Ok(previous);
            }
        }

        let previous_id = self.previous.as_ref().map(|t| t.token_id);
        Err(UaError::new(
            status::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN,
            format!(
                "unknown token id {token_id} (current={}, previous={previous_id:?})",
                self.current.token_id
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{NonePolicy, SecurityPolicy};

    fn token(token_id: u32, created_at: Instant, lifetime: Duration) -> SecurityToken {
        SecurityToken {
            channel_id: 7,
            token_id,
            created_at,
            lifetime,
            keys: NonePolicy.derive_keys(&[], &[]),
        }
    }

    #[test]
    fn current_token_always_valid() {
        let now = Instant::now();
        let security = ChannelSecurity::new(token(1, now, Duration::from_secs(60)));
        let resolved = security.validate_token_id(1, now).unwrap();
        assert_eq!(resolved.token_id, 1);
    }

    #[test]
    fn unknown_token_rejected() {
        let now = Instant::now();
        let security = ChannelSecurity::new(token(1, now, Duration::from_secs(60)));
        let err = security.validate_token_id(2, now).unwrap_err();
        assert_eq!(err.code, status::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN);
    }

    #[test]
    fn previous_token_valid_within_grace() {
        let now = Instant::now();
        let lifetime = Duration::from_secs(60);
        let mut security = ChannelSecurity::new(token(1, now, lifetime));
        security.rotate(token(2, now, lifetime));

        assert_eq!(security.validate_token_id(2, now).unwrap().token_id, 2);
        assert_eq!(security.validate_token_id(1, now).unwrap().token_id, 1);
    }

    #[test]
    fn previous_token_rejected_beyond_grace() {
        let lifetime = Duration::from_secs(60);
        let created = Instant::now();
        let mut security = ChannelSecurity::new(token(1, created, lifetime));
        security.rotate(token(2, created, lifetime));

        // Lifetime + 25% = 75s; 76s later the previous token must be gone.
        let late = created + Duration::from_secs(76);
        assert!(security.validate_token_id(1, late).is_err());
        // The current token is not subject to the grace cutoff.
        assert!(security.validate_token_id(2, late).is_ok());
    }

    #[test]
    fn rotation_drops_oldest() {
        let now = Instant::now();
        let lifetime = Duration::from_secs(60);
        let mut security = ChannelSecurity::new(token(1, now, lifetime));
        security.rotate(token(2, now, lifetime));
        security.rotate(token(3, now, lifetime));

        assert!(security.validate_token_id(1, now).is_err());
        assert!(security.validate_token_id(2, now).is_ok());
        assert!(security.validate_token_id(3, now).is_ok());
    }
}
