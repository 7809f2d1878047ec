//! Chunk encoding and decoding.
//!
//! Splits serialized message bodies across protected chunks on the way out
//! and verifies/decrypts/reassembles them on the way in. Two codecs share
//! the layout: the symmetric one (MSG) keyed by the channel's current token,
//! and the asymmetric one (OPN/CLO) keyed on certificates.
//!
//! Chunk layout, little-endian:
//!
//! ```text
//! header(8) | channelId(4) | security header | sequenceHeader(8) | body
//!           | padding (when encrypted) | signature (when signed)
//! ```
//!
//! The signature covers everything up to itself; the encrypted region starts
//! immediately after the security header and covers the signature too. The
//! padding field is a size byte plus that many filler bytes, every byte
//! holding the size value.

use crate::binary::{BinaryReader, BinaryWriter};
use crate::channel::secure_channel::{Direction, SecureChannel};
use crate::error::UaError;
use crate::framing::header::{ChunkType, MessageHeader, MessageType, HEADER_SIZE};
use crate::security::{ApplicationKeyPair, SecurityProfile, SymmetricKeys};
use crate::status::{self, StatusCode};

/// channelId field length.
const CHANNEL_ID_SIZE: usize = 4;
/// Symmetric security header: the token id.
const TOKEN_ID_SIZE: usize = 4;
/// sequenceNumber + requestId.
const SEQUENCE_HEADER_SIZE: usize = 8;

/// Offset of the symmetric encrypted region: header + channelId + tokenId.
const SYMMETRIC_ENCRYPTION_OFFSET: usize = HEADER_SIZE + CHANNEL_ID_SIZE + TOKEN_ID_SIZE;

/// A fully decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// All chunks reassembled into the plaintext body.
    Message { request_id: u32, body: Vec<u8> },
    /// The sender abandoned the message; only this request fails.
    Aborted {
        request_id: u32,
        status: StatusCode,
        reason: String,
    },
}

/// The asymmetric security header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsymmetricHeader {
    pub security_policy_uri: String,
    pub sender_certificate: Option<Vec<u8>>,
    pub receiver_certificate_thumbprint: Option<Vec<u8>>,
}

/// A decoded OPN/CLO chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOpen {
    pub channel_id: u32,
    pub header: AsymmetricHeader,
    pub request_id: u32,
    pub sequence_number: u32,
    pub body: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Budget and padding math
// ---------------------------------------------------------------------------

/// Largest body payload a single chunk can carry, given the bytes that come
/// before the sequence header and the security profile.
fn chunk_body_budget(
    clear_prefix: usize,
    profile: &SecurityProfile,
    send_buffer_size: usize,
) -> Result<usize, UaError> {
    let too_small = || {
        UaError::new(
            status::BAD_TCP_INTERNAL_ERROR,
            format!("send buffer {send_buffer_size} cannot fit a single protected chunk"),
        )
    };

    let after_prefix = send_buffer_size.checked_sub(clear_prefix).ok_or_else(too_small)?;

    let budget = if profile.is_encrypted {
        // Cipher output must fit; subtract its overhead, align what is left
        // down to whole plaintext blocks, then reserve the sequence header,
        // the padding size byte, and the signature.
        let cipher_budget = after_prefix
            .checked_sub(profile.encryption_overhead)
            .ok_or_else(too_small)?;
        let plain_budget = cipher_budget - (cipher_budget % profile.plain_block_size);
        plain_budget
            .checked_sub(SEQUENCE_HEADER_SIZE + 1 + profile.signature_size)
            .ok_or_else(too_small)?
    } else {
        after_prefix
            .checked_sub(SEQUENCE_HEADER_SIZE + profile.signature_size)
            .ok_or_else(too_small)?
    };

    if budget == 0 {
        return Err(too_small());
    }
    Ok(budget)
}

/// Number of padding filler bytes so that `sequence header + payload +
/// padding + signature` lands on a block boundary.
fn padding_fill(payload_len: usize, profile: &SecurityProfile) -> usize {
    let block = profile.plain_block_size;
    let unpadded = SEQUENCE_HEADER_SIZE + payload_len + 1 + profile.signature_size;
    (block - unpadded % block) % block
}

/// Append the padding field: the size byte plus `fill` filler bytes, each
/// holding the fill count.
fn write_padding(writer: &mut BinaryWriter, fill: usize) {
    for _ in 0..=fill {
        writer.write_u8(fill as u8);
    }
}

// ---------------------------------------------------------------------------
// Symmetric codec (MSG)
// ---------------------------------------------------------------------------

/// Encode a message body into one or more protected MSG chunks.
///
/// All chunks carry `request_id`; sequence numbers advance per chunk; every
/// chunk but the last has chunk type `C`.
pub fn encode_symmetric(
    channel: &SecureChannel,
    request_id: u32,
    body: &[u8],
) -> Result<Vec<Vec<u8>>, UaError> {
    let parameters = &channel.parameters;
    if body.len() as u64 > u64::from(parameters.remote_max_message_size) {
        return Err(UaError::new(
            status::BAD_REQUEST_TOO_LARGE,
            format!(
                "message of {} bytes exceeds remote limit {}",
                body.len(),
                parameters.remote_max_message_size
            ),
        ));
    }

    let profile = channel.policy.symmetric_profile(channel.mode());
    let clear_prefix = SYMMETRIC_ENCRYPTION_OFFSET;
    let budget = chunk_body_budget(
        clear_prefix,
        &profile,
        parameters.local_send_buffer_size as usize,
    )?;

    let chunk_count = body.len().div_ceil(budget).max(1);
    if chunk_count as u64 > u64::from(parameters.remote_max_chunk_count) {
        return Err(UaError::new(
            status::BAD_REQUEST_TOO_LARGE,
            format!(
                "message needs {chunk_count} chunks, remote accepts {}",
                parameters.remote_max_chunk_count
            ),
        ));
    }

    let keys = if profile.is_signed || profile.is_encrypted {
        Some(channel.current_keys(Direction::Outbound)?)
    } else {
        None
    };
    let token_id = channel.current_token_id();

    let mut chunks = Vec::with_capacity(chunk_count);
    for (index, payload) in split_payload(body, budget, chunk_count).enumerate() {
        let chunk_type = if index + 1 == chunk_count {
            ChunkType::Final
        } else {
            ChunkType::Intermediate
        };
        chunks.push(build_symmetric_chunk(
            channel,
            &profile,
            keys.as_ref(),
            token_id,
            chunk_type,
            request_id,
            payload,
        )?);
    }
    Ok(chunks)
}

/// Encode an abort chunk terminating `request_id` with a status and reason.
pub fn encode_abort(
    channel: &SecureChannel,
    request_id: u32,
    abort_status: StatusCode,
    reason: &str,
) -> Result<Vec<u8>, UaError> {
    let mut body = BinaryWriter::with_capacity(8 + reason.len());
    body.write_u32(abort_status.0);
    body.write_string(Some(reason));

    let profile = channel.policy.symmetric_profile(channel.mode());
    let keys = if profile.is_signed || profile.is_encrypted {
        Some(channel.current_keys(Direction::Outbound)?)
    } else {
        None
    };
    build_symmetric_chunk(
        channel,
        &profile,
        keys.as_ref(),
        channel.current_token_id(),
        ChunkType::Abort,
        request_id,
        body.as_slice(),
    )
}

/// Yield `chunk_count` payload slices of at most `budget` bytes.
fn split_payload(
    body: &[u8],
    budget: usize,
    chunk_count: usize,
) -> impl Iterator<Item = &[u8]> + '_ {
    (0..chunk_count).map(move |i| {
        let start = i * budget;
        let end = ((i + 1) * budget).min(body.len());
        &body[start..end]
    })
}

fn build_symmetric_chunk(
    channel: &SecureChannel,
    profile: &SecurityProfile,
    keys: Option<&SymmetricKeys>,
    token_id: u32,
    chunk_type: ChunkType,
    request_id: u32,
    payload: &[u8],
) -> Result<Vec<u8>, UaError> {
    let fill = if profile.is_encrypted {
        padding_fill(payload.len(), profile)
    } else {
        0
    };
    let padding_len = if profile.is_encrypted { fill + 1 } else { 0 };
    let total_size = SYMMETRIC_ENCRYPTION_OFFSET
        + SEQUENCE_HEADER_SIZE
        + payload.len()
        + padding_len
        + profile.signature_size
        + profile.encryption_overhead;

    let mut writer = BinaryWriter::with_capacity(total_size);
    writer.write_bytes(
        &MessageHeader::new(MessageType::SecureMessage, chunk_type, total_size as u32).encode(),
    );
    writer.write_u32(channel.channel_id());
    writer.write_u32(token_id);
    writer.write_u32(channel.next_sequence_number());
    writer.write_u32(request_id);
    writer.write_bytes(payload);
    if profile.is_encrypted {
        write_padding(&mut writer, fill);
    }

    let mut chunk = writer.into_vec();

    if profile.is_signed {
        let keys = keys.expect("signed profile requires keys");
        let signature = channel.policy.symmetric_sign(keys, &chunk);
        chunk.extend_from_slice(&signature);
    }

    if profile.is_encrypted {
        let keys = keys.expect("encrypted profile requires keys");
        let cipher = channel
            .policy
            .symmetric_encrypt(keys, &chunk[SYMMETRIC_ENCRYPTION_OFFSET..])?;
        chunk.truncate(SYMMETRIC_ENCRYPTION_OFFSET);
        chunk.extend_from_slice(&cipher);
    }

    debug_assert_eq!(chunk.len(), total_size);
    Ok(chunk)
}

/// Decode and reassemble the accumulated chunks of one message.
///
/// The caller feeds the chunks in arrival order; the last one has chunk
/// type `F` or `A`. Token ids are resolved against the current and previous
/// tokens, sequence numbers must advance strictly, and every chunk must
/// carry the same request id.
pub fn decode_symmetric(
    channel: &SecureChannel,
    chunks: &[Vec<u8>],
) -> Result<DecodedMessage, UaError> {
    if chunks.is_empty() {
        return Err(UaError::new(
            status::BAD_TCP_INTERNAL_ERROR,
            "no chunks to decode",
        ));
    }

    let profile = channel.policy.symmetric_profile(channel.mode());
    let mut message_request_id: Option<u32> = None;
    let mut body = Vec::new();
    let mut aborted: Option<(StatusCode, String)> = None;

    for chunk in chunks {
        let header = MessageHeader::decode(chunk)?;
        let (request_id, payload) = decode_symmetric_chunk(channel, &profile, chunk)?;

        match message_request_id {
            None => message_request_id = Some(request_id),
            Some(expected) if expected != request_id => {
                return Err(UaError::new(
                    status::BAD_SEQUENCE_NUMBER_INVALID,
                    format!("request id changed mid-message: {expected} then {request_id}"),
                ));
            }
            Some(_) => {}
        }

        if header.chunk_type == ChunkType::Abort {
            let mut reader = BinaryReader::new(&payload);
            let abort_status = StatusCode(reader.read_u32()?);
            let reason = reader.read_string()?.unwrap_or_default();
            aborted = Some((abort_status, reason));
        } else {
            body.extend_from_slice(&payload);
        }

        if body.len() as u64 > u64::from(channel.parameters.local_max_message_size) {
            return Err(UaError::new(
                status::BAD_TCP_MESSAGE_TOO_LARGE,
                format!(
                    "reassembled message exceeds local limit {}",
                    channel.parameters.local_max_message_size
                ),
            ));
        }
    }

    let request_id = message_request_id.expect("at least one chunk was decoded");
    match aborted {
        Some((abort_status, reason)) => Ok(DecodedMessage::Aborted {
            request_id,
            status: abort_status,
            reason,
        }),
        None => Ok(DecodedMessage::Message { request_id, body }),
    }
}

/// Verify, decrypt, and unwrap one symmetric chunk, returning its request id
/// and payload.
fn decode_symmetric_chunk(
    channel: &SecureChannel,
    profile: &SecurityProfile,
    chunk: &[u8],
) -> Result<(u32, Vec<u8>), UaError> {
    if chunk.len() < SYMMETRIC_ENCRYPTION_OFFSET + SEQUENCE_HEADER_SIZE {
        return Err(UaError::new(
            status::BAD_DECODING_ERROR,
            format!("chunk of {} bytes is too short", chunk.len()),
        ));
    }

    let mut reader = BinaryReader::new(chunk);
    reader.skip(HEADER_SIZE)?;
    let channel_id = reader.read_u32()?;
    if channel_id != channel.channel_id() {
        return Err(UaError::new(
            status::BAD_SECURE_CHANNEL_ID_INVALID,
            format!(
                "chunk channel id {channel_id} does not match channel {}",
                channel.channel_id()
            ),
        ));
    }
    let token_id = reader.read_u32()?;

    let keys = if profile.is_signed || profile.is_encrypted {
        Some(channel.keys_for_token(token_id, Direction::Inbound)?)
    } else {
        None
    };

    // Reconstruct the plaintext chunk: clear prefix plus decrypted tail.
    let plain: Vec<u8> = if profile.is_encrypted {
        let keys = keys.as_ref().expect("encrypted profile requires keys");
        let tail = channel
            .policy
            .symmetric_decrypt(keys, &chunk[SYMMETRIC_ENCRYPTION_OFFSET..])?;
        let mut plain = chunk[..SYMMETRIC_ENCRYPTION_OFFSET].to_vec();
        plain.extend_from_slice(&tail);
        plain
    } else {
        chunk.to_vec()
    };

    let signed_len = plain
        .len()
        .checked_sub(profile.signature_size)
        .ok_or_else(|| {
            UaError::new(status::BAD_SECURITY_CHECKS_FAILED, "chunk shorter than signature")
        })?;

    if profile.is_signed {
        let keys = keys.as_ref().expect("signed profile requires keys");
        channel
            .policy
            .symmetric_verify(keys, &plain[..signed_len], &plain[signed_len..])?;
    }

    let payload_end = if profile.is_encrypted {
        if signed_len <= SYMMETRIC_ENCRYPTION_OFFSET {
            return Err(UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "chunk payload region truncated",
            ));
        }
        let fill = plain[signed_len - 1] as usize;
        let padding_len = fill + 1;
        let payload_end = signed_len.checked_sub(padding_len).ok_or_else(|| {
            UaError::new(status::BAD_SECURITY_CHECKS_FAILED, "padding longer than chunk")
        })?;
        if plain[payload_end..signed_len].iter().any(|&b| b as usize != fill) {
            return Err(UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "padding bytes corrupt",
            ));
        }
        payload_end
    } else {
        signed_len
    };

    if payload_end < SYMMETRIC_ENCRYPTION_OFFSET + SEQUENCE_HEADER_SIZE {
        return Err(UaError::new(
            status::BAD_SECURITY_CHECKS_FAILED,
            "chunk payload region truncated",
        ));
    }

    let mut seq_reader = BinaryReader::new(&plain[SYMMETRIC_ENCRYPTION_OFFSET..payload_end]);
    let sequence_number = seq_reader.read_u32()?;
    let request_id = seq_reader.read_u32()?;
    channel.validate_receive_sequence(sequence_number)?;

    Ok((request_id, seq_reader.read_remaining().to_vec()))
}

// ---------------------------------------------------------------------------
// Asymmetric codec (OPN / CLO)
// ---------------------------------------------------------------------------

/// Encode a handshake message as a single asymmetrically protected chunk.
///
/// Under a secured policy the chunk is signed with the local keypair and
/// sealed to the remote certificate; under `None` it travels in the clear
/// with only the policy URI in the header.
pub fn encode_asymmetric(
    channel: &SecureChannel,
    message_type: MessageType,
    request_id: u32,
    body: &[u8],
    keypair: Option<&ApplicationKeyPair>,
) -> Result<Vec<u8>, UaError> {
    let profile = channel.policy.asymmetric_profile();

    let mut security_header = BinaryWriter::with_capacity(64);
    security_header.write_string(Some(channel.policy.uri()));
    if profile.is_signed {
        security_header.write_byte_string(channel.local_certificate.as_deref());
    } else {
        security_header.write_byte_string(None);
    }
    let remote_certificate = channel.remote_certificate();
    if profile.is_encrypted {
        let remote = remote_certificate.as_deref().ok_or_else(|| {
            UaError::new(
                status::BAD_CERTIFICATE_INVALID,
                "remote certificate required for asymmetric encryption",
            )
        })?;
        security_header.write_byte_string(Some(&uastack_crypto::sha::thumbprint(remote)));
    } else {
        security_header.write_byte_string(None);
    }

    let clear_prefix = HEADER_SIZE + CHANNEL_ID_SIZE + security_header.len();
    let budget = chunk_body_budget(
        clear_prefix,
        &profile,
        channel.parameters.local_send_buffer_size as usize,
    )?;
    if body.len() > budget {
        return Err(UaError::new(
            status::BAD_TCP_MESSAGE_TOO_LARGE,
            format!("handshake message of {} bytes exceeds chunk budget {budget}", body.len()),
        ));
    }

    let fill = if profile.is_encrypted {
        padding_fill(body.len(), &profile)
    } else {
        0
    };
    let padding_len = if profile.is_encrypted { fill + 1 } else { 0 };
    let total_size = clear_prefix
        + SEQUENCE_HEADER_SIZE
        + body.len()
        + padding_len
        + profile.signature_size
        + profile.encryption_overhead;

    let mut writer = BinaryWriter::with_capacity(total_size);
    writer.write_bytes(&MessageHeader::new(message_type, ChunkType::Final, total_size as u32).encode());
    writer.write_u32(channel.channel_id());
    writer.write_bytes(security_header.as_slice());
    writer.write_u32(channel.next_sequence_number());
    writer.write_u32(request_id);
    writer.write_bytes(body);
    if profile.is_encrypted {
        write_padding(&mut writer, fill);
    }

    let mut chunk = writer.into_vec();

    if profile.is_signed {
        let keypair = keypair.ok_or_else(|| {
            UaError::new(
                status::BAD_CERTIFICATE_INVALID,
                "local keypair required for asymmetric signing",
            )
        })?;
        let signature = channel.policy.asymmetric_sign(keypair, &chunk)?;
        chunk.extend_from_slice(&signature);
    }

    if profile.is_encrypted {
        let remote = remote_certificate
            .as_deref()
            .expect("checked when writing the thumbprint");
        let cipher = channel
            .policy
            .asymmetric_encrypt(remote, &chunk[clear_prefix..])?;
        chunk.truncate(clear_prefix);
        chunk.extend_from_slice(&cipher);
    }

    debug_assert_eq!(chunk.len(), total_size);
    Ok(chunk)
}

/// Decode one asymmetrically protected handshake chunk.
///
/// `policy` comes from the channel (client) or is resolved from the header
/// URI by the caller before invoking this (server). Signature verification
/// uses the sender certificate carried in the header.
pub fn decode_asymmetric(
    channel: &SecureChannel,
    chunk: &[u8],
    keypair: Option<&ApplicationKeyPair>,
) -> Result<DecodedOpen, UaError> {
    let message_header = MessageHeader::decode(chunk)?;
    if !matches!(
        message_header.message_type,
        MessageType::OpenSecureChannel | MessageType::CloseSecureChannel
    ) {
        return Err(UaError::new(
            status::BAD_TCP_MESSAGE_TYPE_INVALID,
            format!("expected OPN or CLO, got {:?}", message_header.message_type),
        ));
    }

    let mut reader = BinaryReader::new(chunk);
    reader.skip(HEADER_SIZE)?;
    let channel_id = reader.read_u32()?;
    let security_policy_uri = reader
        .read_string()?
        .ok_or_else(|| UaError::new(status::BAD_DECODING_ERROR, "null security policy uri"))?;
    let sender_certificate = reader.read_byte_string()?;
    let receiver_certificate_thumbprint = reader.read_byte_string()?;
    let clear_prefix = reader.position();

    if security_policy_uri != channel.policy.uri() {
        return Err(UaError::new(
            status::BAD_SECURITY_POLICY_REJECTED,
            format!("policy mismatch: header carries {security_policy_uri}"),
        ));
    }

    let profile = channel.policy.asymmetric_profile();

    let plain: Vec<u8> = if profile.is_encrypted {
        let keypair = keypair.ok_or_else(|| {
            UaError::new(
                status::BAD_CERTIFICATE_INVALID,
                "local keypair required for asymmetric decryption",
            )
        })?;
        let tail = channel
            .policy
            .asymmetric_decrypt(keypair, &chunk[clear_prefix..])?;
        let mut plain = chunk[..clear_prefix].to_vec();
        plain.extend_from_slice(&tail);
        plain
    } else {
        chunk.to_vec()
    };

    let signed_len = plain
        .len()
        .checked_sub(profile.signature_size)
        .ok_or_else(|| {
            UaError::new(status::BAD_SECURITY_CHECKS_FAILED, "chunk shorter than signature")
        })?;

    if profile.is_signed {
        let sender = sender_certificate.as_deref().ok_or_else(|| {
            UaError::new(
                status::BAD_CERTIFICATE_INVALID,
                "signed handshake chunk carries no sender certificate",
            )
        })?;
        channel
            .policy
            .asymmetric_verify(sender, &plain[..signed_len], &plain[signed_len..])?;
    }

    let payload_end = if profile.is_encrypted {
        if signed_len <= clear_prefix {
            return Err(UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "handshake chunk payload region truncated",
            ));
        }
        let fill = plain[signed_len - 1] as usize;
        let padding_len = fill + 1;
        let payload_end = signed_len.checked_sub(padding_len).ok_or_else(|| {
            UaError::new(status::BAD_SECURITY_CHECKS_FAILED, "padding longer than chunk")
        })?;
        if plain[payload_end..signed_len].iter().any(|&b| b as usize != fill) {
            return Err(UaError::new(
                status::BAD_SECURITY_CHECKS_FAILED,
                "padding bytes corrupt",
            ));
        }
        payload_end
    } else {
        signed_len
    };

    if payload_end < clear_prefix + SEQUENCE_HEADER_SIZE {
        return Err(UaError::new(
            status::BAD_SECURITY_CHECKS_FAILED,
            "handshake chunk payload region truncated",
        ));
    }

    let mut seq_reader = BinaryReader::new(&plain[clear_prefix..payload_end]);
    let sequence_number = seq_reader.read_u32()?;
    let request_id = seq_reader.read_u32()?;
    channel.validate_receive_sequence(sequence_number)?;

    Ok(DecodedOpen {
        channel_id,
        header: AsymmetricHeader {
            security_policy_uri,
            sender_certificate,
            receiver_certificate_thumbprint,
        },
        request_id,
        sequence_number,
        body: seq_reader.read_remaining().to_vec(),
    })
}

/// Peek at the policy URI of an asymmetric chunk without decoding it.
///
/// The server needs the URI to pick the policy before it can decrypt.
pub fn peek_asymmetric_policy_uri(chunk: &[u8]) -> Result<String, UaError> {
    let mut reader = BinaryReader::new(chunk);
    reader.skip(HEADER_SIZE + CHANNEL_ID_SIZE)?;
    reader
        .read_string()?
        .ok_or_else(|| UaError::new(status::BAD_DECODING_ERROR, "null security policy uri"))
}

/// Peek at the channel id of any secured chunk.
pub fn peek_channel_id(chunk: &[u8]) -> Result<u32, UaError> {
    let mut reader = BinaryReader::new(chunk);
    reader.skip(HEADER_SIZE)?;
    reader.read_u32()
}

// ---------------------------------------------------------------------------
// Chunk collection
// ---------------------------------------------------------------------------

/// Accumulates the raw chunks of one inbound message until the final or
/// abort chunk arrives. Chunks of one message are contiguous on a channel,
/// so arrival order is grouping order.
pub struct ChunkCollector {
    buffers: Vec<Vec<u8>>,
    max_chunk_count: u32,
}

impl ChunkCollector {
    pub fn new(max_chunk_count: u32) -> Self {
        Self {
            buffers: Vec::new(),
            max_chunk_count,
        }
    }

    /// Add one framed chunk. Returns the complete chunk set once the final
    /// or abort chunk lands.
    ///
    /// # Errors
    ///
    /// `Bad_TcpMessageTooLarge` when the per-message chunk count is
    /// exceeded; fatal to the channel.
    pub fn push(&mut self, chunk: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, UaError> {
        let header = MessageHeader::decode(&chunk)?;
        self.buffers.push(chunk);

        if self.buffers.len() as u64 > u64::from(self.max_chunk_count) {
            return Err(UaError::new(
                status::BAD_TCP_MESSAGE_TOO_LARGE,
                format!("max chunk count exceeded ({})", self.max_chunk_count),
            ));
        }

        match header.chunk_type {
            ChunkType::Final | ChunkType::Abort => Ok(Some(std::mem::take(&mut self.buffers))),
            ChunkType::Intermediate => Ok(None),
        }
    }

    #[must_use]
    pub fn pending_chunks(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::config::ChannelConfig;
    use crate::channel::params::ChannelParameters;
    use crate::channel::secure_channel::ChannelRole;
    use crate::channel::token::SecurityToken;
    use crate::framing::messages::HelloMessage;
    use crate::security::{
        Basic256Sha256, MessageSecurityMode, NonePolicy, SecurityPolicy as _,
    };
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn params(buffer: u32, chunk_count: u32) -> ChannelParameters {
        ChannelParameters::from_hello(
            &HelloMessage {
                protocol_version: 0,
                receive_buffer_size: buffer,
                send_buffer_size: buffer,
                max_message_size: 0,
                max_chunk_count: chunk_count,
                endpoint_url: "opc.tcp://localhost:12685/test".to_string(),
            },
            &ChannelConfig {
                max_chunk_size: buffer,
                max_chunk_count: chunk_count,
                max_message_size: ChannelConfig::DEFAULT_MAX_MESSAGE_SIZE,
            },
        )
        .unwrap()
    }

    pub(super) fn secured_pair(
        mode: MessageSecurityMode,
        buffer: u32,
    ) -> (SecureChannel, SecureChannel) {
        let policy = Arc::new(Basic256Sha256);
        let client_nonce = vec![0x11; 32];
        let server_nonce = vec![0x22; 32];

        let make = |role| {
            let channel = SecureChannel::new(
                role,
                policy.clone() as Arc<dyn crate::security::SecurityPolicy>,
                mode,
                params(buffer, 32),
                None,
            );
            channel.set_channel_id(9);
            channel.install_token(SecurityToken {
                channel_id: 9,
                token_id: 1,
                created_at: Instant::now(),
                lifetime: Duration::from_secs(3600),
                keys: Basic256Sha256.derive_keys(&client_nonce, &server_nonce),
            });
            channel
        };

        (make(ChannelRole::Client), make(ChannelRole::Server))
    }

    pub(super) fn plain_pair(buffer: u32) -> (SecureChannel, SecureChannel) {
        let make = |role| {
            let channel = SecureChannel::new(
                role,
                Arc::new(NonePolicy) as Arc<dyn crate::security::SecurityPolicy>,
                MessageSecurityMode::None,
                params(buffer, 32),
                None,
            );
            channel.set_channel_id(9);
            channel.install_token(SecurityToken {
                channel_id: 9,
                token_id: 1,
                created_at: Instant::now(),
                lifetime: Duration::from_secs(3600),
                keys: NonePolicy.derive_keys(&[], &[]),
            });
            channel
        };
        (make(ChannelRole::Client), make(ChannelRole::Server))
    }

    #[test]
    fn plain_roundtrip_single_chunk() {
        let (client, server) = plain_pair(65_535);
        let body = vec![0x42; 100];

        let chunks = encode_symmetric(&client, 7, &body).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..4], b"MSGF");

        match decode_symmetric(&server, &chunks).unwrap() {
            DecodedMessage::Message { request_id, body: decoded } => {
                assert_eq!(request_id, 7);
                assert_eq!(decoded, body);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn signed_roundtrip() {
        let (client, server) = secured_pair(MessageSecurityMode::Sign, 65_535);
        let body: Vec<u8> = (0..1000).map(|i| (i & 0xFF) as u8).collect();

        let chunks = encode_symmetric(&client, 3, &body).unwrap();
        match decode_symmetric(&server, &chunks).unwrap() {
            DecodedMessage::Message { request_id, body: decoded } => {
                assert_eq!(request_id, 3);
                assert_eq!(decoded, body);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn sign_and_encrypt_roundtrip_multi_chunk() {
        let (client, server) = secured_pair(MessageSecurityMode::SignAndEncrypt, 8192);
        let body: Vec<u8> = (0..40_000).map(|i| (i % 251) as u8).collect();

        let chunks = encode_symmetric(&client, 12, &body).unwrap();
        assert!(chunks.len() > 1, "payload should span chunks");
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk[3], b'C');
            assert!(chunk.len() <= 8192);
        }
        assert_eq!(chunks.last().unwrap()[3], b'F');

        match decode_symmetric(&server, &chunks).unwrap() {
            DecodedMessage::Message { request_id, body: decoded } => {
                assert_eq!(request_id, 12);
                assert_eq!(decoded, body);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn tampered_chunk_fails_verification() {
        let (client, server) = secured_pair(MessageSecurityMode::SignAndEncrypt, 65_535);
        let mut chunks = encode_symmetric(&client, 1, &[0x55; 256]).unwrap();
        let len = chunks[0].len();
        chunks[0][len - 10] ^= 0x01;

        let err = decode_symmetric(&server, &chunks).unwrap_err();
        assert_eq!(err.code, status::BAD_SECURITY_CHECKS_FAILED);
    }

    #[test]
    fn wrong_channel_id_rejected() {
        let (client, server) = plain_pair(65_535);
        let chunks = encode_symmetric(&client, 1, &[1, 2, 3]).unwrap();

        server.set_channel_id(10);
        let err = decode_symmetric(&server, &chunks).unwrap_err();
        assert_eq!(err.code, status::BAD_SECURE_CHANNEL_ID_INVALID);
    }

    #[test]
    fn unknown_token_rejected() {
        let (client, server) = secured_pair(MessageSecurityMode::Sign, 65_535);
        let mut chunks = encode_symmetric(&client, 1, &[1, 2, 3]).unwrap();
        // Corrupt the token id field (bytes 12..16).
        chunks[0][12] ^= 0xFF;

        let err = decode_symmetric(&server, &chunks).unwrap_err();
        assert_eq!(err.code, status::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN);
    }

    #[test]
    fn previous_token_accepted_after_rotation() {
        let (client, server) = secured_pair(MessageSecurityMode::Sign, 65_535);
        let chunks = encode_symmetric(&client, 1, &[9; 16]).unwrap();

        // Server rotates to a new token before the chunk arrives.
        server.install_token(SecurityToken {
            channel_id: 9,
            token_id: 2,
            created_at: Instant::now(),
            lifetime: Duration::from_secs(3600),
            keys: Basic256Sha256.derive_keys(&[0x33; 32], &[0x44; 32]),
        });

        assert!(matches!(
            decode_symmetric(&server, &chunks).unwrap(),
            DecodedMessage::Message { request_id: 1, .. }
        ));
    }

    #[test]
    fn abort_chunk_surfaces_status_and_reason() {
        let (client, server) = plain_pair(65_535);
        let abort = encode_abort(&client, 42, status::BAD_TIMEOUT, "worker gave up").unwrap();
        assert_eq!(abort[3], b'A');

        match decode_symmetric(&server, &[abort]).unwrap() {
            DecodedMessage::Aborted { request_id, status: s, reason } => {
                assert_eq!(request_id, 42);
                assert_eq!(s, status::BAD_TIMEOUT);
                assert_eq!(reason, "worker gave up");
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn abort_after_intermediate_discards_partial_body() {
        let (client, server) = plain_pair(8192);
        let body = vec![0x77; 20_000];
        let mut chunks = encode_symmetric(&client, 5, &body).unwrap();
        assert!(chunks.len() > 2);

        // Drop the tail and terminate the message with an abort chunk, as a
        // sender that gave up mid-message would.
        chunks.truncate(2);
        chunks.push(
            encode_abort(&client, 5, status::BAD_REQUEST_TOO_LARGE, "changed my mind").unwrap(),
        );

        match decode_symmetric(&server, &chunks) {
            Ok(DecodedMessage::Aborted { request_id, status: s, .. }) => {
                assert_eq!(request_id, 5);
                assert_eq!(s, status::BAD_REQUEST_TOO_LARGE);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn sequence_regression_is_fatal() {
        let (client, server) = plain_pair(65_535);
        let chunks_a = encode_symmetric(&client, 1, &[1; 8]).unwrap();
        let chunks_b = encode_symmetric(&client, 2, &[2; 8]).unwrap();

        // Deliver b then a: a's sequence number is stale.
        decode_symmetric(&server, &chunks_b).unwrap();
        let err = decode_symmetric(&server, &chunks_a).unwrap_err();
        assert_eq!(err.code, status::BAD_SEQUENCE_NUMBER_INVALID);
    }

    #[test]
    fn chunk_sizes_respect_send_buffer() {
        for buffer in [8192u32, 16_384, 65_535] {
            let (client, _) = secured_pair(MessageSecurityMode::SignAndEncrypt, buffer);
            let body = vec![0xAB; buffer as usize * 3];
            let chunks = encode_symmetric(&client, 1, &body).unwrap();
            for chunk in &chunks {
                assert!(
                    chunk.len() <= buffer as usize,
                    "chunk of {} exceeds buffer {buffer}",
                    chunk.len()
                );
            }
        }
    }

    #[test]
    fn oversized_message_rejected_on_encode() {
        let (client, _) = plain_pair(8192);
        // remote_max_chunk_count is 32 via config default on the remote
        // side; build a body needing more chunks than allowed.
        let budget = 8192 - 24;
        let body = vec![0; budget * 40];
        let err = encode_symmetric(&client, 1, &body).unwrap_err();
        assert_eq!(err.code, status::BAD_REQUEST_TOO_LARGE);
    }

    #[test]
    fn collector_completes_on_final() {
        let (client, _) = plain_pair(8192);
        let body = vec![0x11; 20_000];
        let chunks = encode_symmetric(&client, 1, &body).unwrap();
        let n = chunks.len();

        let mut collector = ChunkCollector::new(32);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let out = collector.push(chunk).unwrap();
            if i + 1 == n {
                assert_eq!(out.unwrap().len(), n);
            } else {
                assert!(out.is_none());
            }
        }
        assert_eq!(collector.pending_chunks(), 0);
    }

    #[test]
    fn collector_enforces_chunk_count() {
        let (client, _) = plain_pair(8192);
        let body = vec![0x11; 30_000];
        let chunks = encode_symmetric(&client, 1, &body).unwrap();
        assert!(chunks.len() > 2);

        let mut collector = ChunkCollector::new(2);
        let mut result = Ok(None);
        for chunk in chunks {
            result = collector.push(chunk);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err().code, status::BAD_TCP_MESSAGE_TOO_LARGE);
    }

    // -- Asymmetric codec --

    fn asymmetric_channels(
        policy_is_none: bool,
    ) -> (SecureChannel, SecureChannel, ApplicationKeyPair, ApplicationKeyPair) {
        let client_keys = ApplicationKeyPair::generate();
        let server_keys = ApplicationKeyPair::generate();

        let policy: Arc<dyn crate::security::SecurityPolicy> = if policy_is_none {
            Arc::new(NonePolicy)
        } else {
            Arc::new(Basic256Sha256)
        };

        let client = SecureChannel::new(
            ChannelRole::Client,
            policy.clone(),
            if policy_is_none {
                MessageSecurityMode::None
            } else {
                MessageSecurityMode::SignAndEncrypt
            },
            params(65_535, 32),
            (!policy_is_none).then(|| client_keys.certificate()),
        );
        let server = SecureChannel::new(
            ChannelRole::Server,
            policy,
            if policy_is_none {
                MessageSecurityMode::None
            } else {
                MessageSecurityMode::SignAndEncrypt
            },
            params(65_535, 32),
            (!policy_is_none).then(|| server_keys.certificate()),
        );
        if !policy_is_none {
            client.set_remote_certificate(Some(server_keys.certificate()));
            server.set_remote_certificate(Some(client_keys.certificate()));
        }
        (client, server, client_keys, server_keys)
    }

    #[test]
    fn asymmetric_plain_roundtrip() {
        let (client, server, _, _) = asymmetric_channels(true);
        let body = b"open secure channel request".to_vec();

        let chunk = encode_asymmetric(
            &client,
            MessageType::OpenSecureChannel,
            1,
            &body,
            None,
        )
        .unwrap();
        assert_eq!(&chunk[..4], b"OPNF");

        let decoded = decode_asymmetric(&server, &chunk, None).unwrap();
        assert_eq!(decoded.body, body);
        assert_eq!(decoded.request_id, 1);
        assert_eq!(decoded.header.security_policy_uri, crate::security::none::URI);
        assert_eq!(decoded.header.sender_certificate, None);
    }

    #[test]
    fn asymmetric_secured_roundtrip() {
        let (client, server, client_keys, server_keys) = asymmetric_channels(false);
        let body = vec![0x6B; 333];

        let chunk = encode_asymmetric(
            &client,
            MessageType::OpenSecureChannel,
            1,
            &body,
            Some(&client_keys),
        )
        .unwrap();

        let decoded = decode_asymmetric(&server, &chunk, Some(&server_keys)).unwrap();
        assert_eq!(decoded.body, body);
        assert_eq!(
            decoded.header.sender_certificate.as_deref(),
            Some(client_keys.certificate().as_slice())
        );
        assert_eq!(
            decoded.header.receiver_certificate_thumbprint.as_deref(),
            Some(uastack_crypto::sha::thumbprint(&server_keys.certificate()).as_slice())
        );
    }

    #[test]
    fn asymmetric_tamper_detected() {
        let (client, server, client_keys, server_keys) = asymmetric_channels(false);
        let mut chunk = encode_asymmetric(
            &client,
            MessageType::OpenSecureChannel,
            1,
            &[0x10; 64],
            Some(&client_keys),
        )
        .unwrap();
        let len = chunk.len();
        chunk[len - 5] ^= 0x01;

        assert!(decode_asymmetric(&server, &chunk, Some(&server_keys)).is_err());
    }

    #[test]
    fn asymmetric_peek_functions() {
        let (client, _, client_keys, _) = asymmetric_channels(false);
        client.set_channel_id(77);
        let chunk = encode_asymmetric(
            &client,
            MessageType::OpenSecureChannel,
            1,
            &[0x10; 16],
            Some(&client_keys),
        )
        .unwrap();

        assert_eq!(peek_channel_id(&chunk).unwrap(), 77);
        assert_eq!(
            peek_asymmetric_policy_uri(&chunk).unwrap(),
            crate::security::basic256::URI
        );
    }
}
