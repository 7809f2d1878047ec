//! Secure channel state.
//!
//! A [`SecureChannel`] is the ownership root of one negotiated connection:
//! the channel id, the security policy and mode, both certificates, the
//! current/previous token pair, the outbound counters, and the pending
//! request map. Pipelines borrow the channel; there is no side table keyed
//! on sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::channel::params::ChannelParameters;
use crate::channel::sequence::{SequenceNumber, SequenceValidator};
use crate::channel::token::{ChannelSecurity, SecurityToken};
use crate::error::UaError;
use crate::message::{RequestMessage, ResponseMessage};
use crate::security::{MessageSecurityMode, SecurityPolicy, SymmetricKeys};
use crate::status;

/// Which half of the conversation this side is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Client,
    Server,
}

/// One in-flight request awaiting its response.
pub struct PendingRequest {
    /// The encoded-from request, retained so a reconnect can resend it.
    pub request: RequestMessage,
    pub sender: oneshot::Sender<Result<ResponseMessage, UaError>>,
    pub submitted_at: Instant,
}

pub struct SecureChannel {
    channel_id: AtomicU32,
    role: ChannelRole,
    pub policy: Arc<dyn SecurityPolicy>,
    /// Mutable because a server learns the negotiated mode from the OPN
    /// body, after the channel object already exists.
    mode: Mutex<MessageSecurityMode>,
    pub parameters: ChannelParameters,
    pub local_certificate: Option<Vec<u8>>,
    remote_certificate: Mutex<Option<Vec<u8>>>,
    security: Mutex<Option<ChannelSecurity>>,
    send_sequence: SequenceNumber,
    request_id: SequenceNumber,
    receive_sequence: Mutex<SequenceValidator>,
    pending: Mutex<HashMap<u32, PendingRequest>>,
}

impl SecureChannel {
    pub fn new(
        role: ChannelRole,
        policy: Arc<dyn SecurityPolicy>,
        mode: MessageSecurityMode,
        parameters: ChannelParameters,
        local_certificate: Option<Vec<u8>>,
    ) -> Self {
        Self {
            channel_id: AtomicU32::new(0),
            role,
            policy,
            mode: Mutex::new(mode),
            parameters,
            local_certificate,
            remote_certificate: Mutex::new(None),
            security: Mutex::new(None),
            send_sequence: SequenceNumber::new(1),
            request_id: SequenceNumber::new(1),
            receive_sequence: Mutex::new(SequenceValidator::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    #[must_use]
    pub fn mode(&self) -> MessageSecurityMode {
        *self.mode.lock().expect("lock poisoned")
    }

    pub fn set_mode(&self, mode: MessageSecurityMode) {
        *self.mode.lock().expect("lock poisoned") = mode;
    }

    #[must_use]
    pub fn channel_id(&self) -> u32 {
        self.channel_id.load(Ordering::SeqCst)
    }

    pub fn set_channel_id(&self, id: u32) {
        self.channel_id.store(id, Ordering::SeqCst);
    }

    #[must_use]
    pub fn remote_certificate(&self) -> Option<Vec<u8>> {
        self.remote_certificate.lock().expect("lock poisoned").clone()
    }

    pub fn set_remote_certificate(&self, certificate: Option<Vec<u8>>) {
        *self.remote_certificate.lock().expect("lock poisoned") = certificate;
    }

    /// Install an issued token: the first one creates the channel security,
    /// later ones rotate it. Token rotation happens on the decode path only.
    pub fn install_token(&self, token: SecurityToken) {
        let mut guard = self.security.lock().expect("lock poisoned");
        match guard.as_mut() {
            Some(security) => security.rotate(token),
            None => *guard = Some(ChannelSecurity::new(token)),
        }
    }

    /// Whether an OPN has completed on this channel.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.security.lock().expect("lock poisoned").is_some()
    }

    /// Current token's id, zero before the first OPN completes.
    #[must_use]
    pub fn current_token_id(&self) -> u32 {
        self.security
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map_or(0, |s| s.current().token_id)
    }

    /// Resolve a chunk's token id and clone the symmetric keys guarding the
    /// given direction.
    pub fn keys_for_token(
        &self,
        token_id: u32,
        direction: Direction,
    ) -> Result<SymmetricKeys, UaError> {
        let guard = self.security.lock().expect("lock poisoned");
        let security = guard.as_ref().ok_or_else(|| {
            UaError::new(status::BAD_INVALID_STATE, "no security token installed")
        })?;
        let token = security.validate_token_id(token_id, Instant::now())?;
        Ok(self.direction_keys(&token.keys, direction).clone())
    }

    /// Keys for the current token in the given direction.
    pub fn current_keys(&self, direction: Direction) -> Result<SymmetricKeys, UaError> {
        let guard = self.security.lock().expect("lock poisoned");
        let security = guard.as_ref().ok_or_else(|| {
            UaError::new(status::BAD_INVALID_STATE, "no security token installed")
        })?;
        Ok(self.direction_keys(&security.current().keys, direction).clone())
    }

    fn direction_keys<'a>(
        &self,
        keys: &'a crate::security::ChannelKeys,
        direction: Direction,
    ) -> &'a SymmetricKeys {
        // Client-sent traffic is protected by the client key set.
        let client_sent = match (self.role, direction) {
            (ChannelRole::Client, Direction::Outbound) => true,
            (ChannelRole::Client, Direction::Inbound) => false,
            (ChannelRole::Server, Direction::Outbound) => false,
            (ChannelRole::Server, Direction::Inbound) => true,
        };
        if client_sent { &keys.client } else { &keys.server }
    }

    /// Next outbound sequence number.
    pub fn next_sequence_number(&self) -> u32 {
        self.send_sequence.next()
    }

    /// Next request id (client side).
    pub fn next_request_id(&self) -> u32 {
        self.request_id.next()
    }

    /// Validate an inbound chunk's sequence number; violations are fatal.
    pub fn validate_receive_sequence(&self, sequence_number: u32) -> Result<(), UaError> {
        self.receive_sequence
            .lock()
            .expect("lock poisoned")
            .validate(sequence_number)
    }

    /// Reset inbound sequence tracking (a reconnected transport restarts
    /// its counters).
    pub fn reset_receive_sequence(&self) {
        *self.receive_sequence.lock().expect("lock poisoned") = SequenceValidator::new();
    }

    // -- Pending request map --

    /// Register an in-flight request. The entry is removed on any terminal
    /// outcome via [`complete_pending`](Self::complete_pending) or
    /// [`fail_all_pending`](Self::fail_all_pending).
    pub fn register_pending(&self, request_id: u32, pending: PendingRequest) {
        self.pending
            .lock()
            .expect("lock poisoned")
            .insert(request_id, pending);
    }

    /// Remove and return the pending entry for a request id, if any.
    pub fn complete_pending(&self, request_id: u32) -> Option<PendingRequest> {
        self.pending.lock().expect("lock poisoned").remove(&request_id)
    }

    /// Drop an entry without completing it (terminal handler on external
    /// completion such as an upper-layer timeout).
    pub fn remove_pending(&self, request_id: u32) {
        self.pending.lock().expect("lock poisoned").remove(&request_id);
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }

    /// Take every pending entry, leaving the map empty. Used to fail them on
    /// channel loss or to resend them after a reconnect.
    pub fn drain_pending(&self) -> Vec<(u32, PendingRequest)> {
        self.pending
            .lock()
            .expect("lock poisoned")
            .drain()
            .collect()
    }

    /// Fail every pending request with the given error.
    pub fn fail_all_pending(&self, error: &UaError) {
        for (_, pending) in self.drain_pending() {
            let _ = pending.sender.send(Err(error.clone()));
        }
    }
}

/// Which way a chunk is travelling relative to this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::config::ChannelConfig;
    use crate::framing::messages::HelloMessage;
    use crate::message::{RequestHeader, TestStackRequest, Variant};
    use crate::security::{Basic256Sha256, NonePolicy};
    use std::time::Duration;

    fn params() -> ChannelParameters {
        ChannelParameters::from_hello(
            &HelloMessage {
                protocol_version: 0,
                receive_buffer_size: 65_535,
                send_buffer_size: 65_535,
                max_message_size: 0,
                max_chunk_count: 0,
                endpoint_url: "opc.tcp://localhost:12685/test".to_string(),
            },
            &ChannelConfig::default(),
        )
        .unwrap()
    }

    fn test_request() -> RequestMessage {
        RequestMessage::TestStack(TestStackRequest {
            request_header: RequestHeader::new(1),
            test_id: 1,
            iteration: 0,
            input: Variant::Int32(42),
        })
    }

    fn channel(role: ChannelRole) -> SecureChannel {
        SecureChannel::new(
            role,
            Arc::new(NonePolicy),
            MessageSecurityMode::None,
            params(),
            None,
        )
    }

    #[test]
    fn channel_id_is_mutable() {
        let ch = channel(ChannelRole::Client);
        assert_eq!(ch.channel_id(), 0);
        ch.set_channel_id(42);
        assert_eq!(ch.channel_id(), 42);
    }

    #[test]
    fn direction_keys_are_mirrored_between_roles() {
        let policy = Basic256Sha256;
        let keys = crate::security::SecurityPolicy::derive_keys(
            &policy,
            &[0x11; 32],
            &[0x22; 32],
        );

        let client = channel(ChannelRole::Client);
        let server = channel(ChannelRole::Server);

        // What the client sends with, the server receives with.
        let client_out = client.direction_keys(&keys, Direction::Outbound);
        let server_in = server.direction_keys(&keys, Direction::Inbound);
        assert_eq!(client_out, server_in);

        let client_in = client.direction_keys(&keys, Direction::Inbound);
        let server_out = server.direction_keys(&keys, Direction::Outbound);
        assert_eq!(client_in, server_out);

        assert_ne!(client_out, client_in);
    }

    #[test]
    fn token_installation_and_rotation() {
        let ch = channel(ChannelRole::Client);
        assert!(!ch.has_token());

        let make_token = |id: u32| SecurityToken {
            channel_id: 1,
            token_id: id,
            created_at: Instant::now(),
            lifetime: Duration::from_secs(3600),
            keys: crate::security::SecurityPolicy::derive_keys(&NonePolicy, &[], &[]),
        };

        ch.install_token(make_token(1));
        assert!(ch.has_token());
        assert_eq!(ch.current_token_id(), 1);

        ch.install_token(make_token(2));
        assert_eq!(ch.current_token_id(), 2);
        // The previous token is still accepted.
        assert!(ch.keys_for_token(1, Direction::Inbound).is_ok());
        assert!(ch.keys_for_token(3, Direction::Inbound).is_err());
    }

    #[test]
    fn pending_map_bounds() {
        let ch = channel(ChannelRole::Client);

        let mut receivers = Vec::new();
        for id in 1..=10u32 {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            ch.register_pending(
                id,
                PendingRequest {
                    request: test_request(),
                    sender: tx,
                    submitted_at: Instant::now(),
                },
            );
        }
        assert_eq!(ch.pending_count(), 10);

        // Terminal removal keeps the map bounded by outstanding requests.
        assert!(ch.complete_pending(3).is_some());
        assert!(ch.complete_pending(3).is_none());
        assert_eq!(ch.pending_count(), 9);

        ch.fail_all_pending(&UaError::from_code(status::BAD_CONNECTION_CLOSED));
        assert_eq!(ch.pending_count(), 0);
    }

    #[test]
    fn fail_all_pending_delivers_error() {
        let ch = channel(ChannelRole::Client);
        let (tx, mut rx) = oneshot::channel();
        ch.register_pending(
            1,
            PendingRequest {
                request: test_request(),
                sender: tx,
                submitted_at: Instant::now(),
            },
        );

        ch.fail_all_pending(&UaError::from_code(status::BAD_CONNECTION_CLOSED));
        let result = rx.try_recv().expect("sender completed");
        assert_eq!(result.unwrap_err().code, status::BAD_CONNECTION_CLOSED);
    }

    #[test]
    fn request_ids_are_unique_and_nonzero_across_a_million_sends() {
        let ch = channel(ChannelRole::Client);
        let mut seen = std::collections::HashSet::with_capacity(1_000_000);
        for _ in 0..1_000_000 {
            let id = ch.next_request_id();
            assert_ne!(id, 0);
            assert!(id <= crate::channel::sequence::SEQUENCE_WRAP_LIMIT);
            assert!(seen.insert(id), "duplicate request id {id}");
        }
    }
}
