//! Secure-channel state and the chunk pipeline.

pub mod chunks;
pub mod config;
pub mod params;
pub mod secure_channel;
pub mod sequence;
pub mod token;

pub use chunks::{
    decode_asymmetric, decode_symmetric, encode_abort, encode_asymmetric, encode_symmetric,
    peek_asymmetric_policy_uri, peek_channel_id, AsymmetricHeader, ChunkCollector, DecodedMessage,
    DecodedOpen,
};
pub use config::ChannelConfig;
pub use params::{ChannelParameters, MIN_BUFFER_SIZE};
pub use secure_channel::{ChannelRole, Direction, PendingRequest, SecureChannel};
pub use sequence::{SequenceNumber, SequenceValidator, SEQUENCE_WRAP_LIMIT};
pub use token::{ChannelSecurity, SecurityToken};
