//! Negotiated channel parameters.
//!
//! Derived once from the peer's HEL (server side) or ACK (client side) and
//! immutable afterwards; every chunk on the channel is bounded by these
//! values. All capacity math saturates; it never wraps.

use crate::channel::config::ChannelConfig;
use crate::error::UaError;
use crate::framing::messages::{AcknowledgeMessage, HelloMessage};
use crate::status;

/// Smallest buffer size either side may advertise.
pub const MIN_BUFFER_SIZE: u32 = 8192;

/// The negotiated, immutable limits of one secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParameters {
    pub local_max_message_size: u32,
    pub local_receive_buffer_size: u32,
    pub local_send_buffer_size: u32,
    pub local_max_chunk_count: u32,
    pub remote_max_message_size: u32,
    pub remote_receive_buffer_size: u32,
    pub remote_send_buffer_size: u32,
    pub remote_max_chunk_count: u32,
}

/// The peer's advertised limits, direction-normalized.
struct RemoteLimits {
    receive_buffer_size: u32,
    send_buffer_size: u32,
    max_message_size: u32,
    max_chunk_count: u32,
}

impl ChannelParameters {
    /// Server-side derivation from the client's HEL.
    pub fn from_hello(hello: &HelloMessage, config: &ChannelConfig) -> Result<Self, UaError> {
        Self::derive(
            RemoteLimits {
                receive_buffer_size: hello.receive_buffer_size,
                send_buffer_size: hello.send_buffer_size,
                max_message_size: hello.max_message_size,
                max_chunk_count: hello.max_chunk_count,
            },
            config,
        )
    }

    /// Client-side derivation from the server's ACK.
    pub fn from_acknowledge(
        ack: &AcknowledgeMessage,
        config: &ChannelConfig,
    ) -> Result<Self, UaError> {
        Self::derive(
            RemoteLimits {
                receive_buffer_size: ack.receive_buffer_size,
                send_buffer_size: ack.send_buffer_size,
                max_message_size: ack.max_message_size,
                max_chunk_count: ack.max_chunk_count,
            },
            config,
        )
    }

    fn derive(remote: RemoteLimits, config: &ChannelConfig) -> Result<Self, UaError> {
        if remote.receive_buffer_size < MIN_BUFFER_SIZE || remote.send_buffer_size < MIN_BUFFER_SIZE
        {
            return Err(UaError::new(
                status::BAD_TCP_INTERNAL_ERROR,
                format!(
                    "peer advertised buffer below minimum {MIN_BUFFER_SIZE}: rx={}, tx={}",
                    remote.receive_buffer_size, remote.send_buffer_size
                ),
            ));
        }

        // A zero max-message-size or max-chunk-count advertisement means
        // "no limit imposed".
        let remote_max_message_size = no_limit(remote.max_message_size);
        let remote_max_chunk_count = no_limit(remote.max_chunk_count);

        // Our receive buffer is sized by what the remote may send, and our
        // send buffer by what the remote can take.
        let local_receive_buffer_size = remote.send_buffer_size.min(config.max_chunk_size);
        let local_send_buffer_size = remote.receive_buffer_size.min(config.max_chunk_size);

        // Max chunk count the remote may send us is purely local policy.
        let local_max_chunk_count = config.max_chunk_count;

        // The product can exceed u32; saturate before clamping.
        let local_max_message_size = local_receive_buffer_size
            .saturating_mul(local_max_chunk_count)
            .min(config.max_message_size);

        Ok(Self {
            local_max_message_size,
            local_receive_buffer_size,
            local_send_buffer_size,
            local_max_chunk_count,
            remote_max_message_size,
            remote_receive_buffer_size: remote.receive_buffer_size,
            remote_send_buffer_size: remote.send_buffer_size,
            remote_max_chunk_count,
        })
    }
}

fn no_limit(advertised: u32) -> u32 {
    if advertised == 0 { u32::MAX } else { advertised }
}
