//! HEL / ACK / ERR message bodies.
//!
//! These three message types are never chunked (chunk type is always `F`)
//! and never secured; they frame the connection handshake and fatal-error
//! reporting.

use crate::binary::{BinaryReader, BinaryWriter};
use crate::error::UaError;
use crate::framing::header::{ChunkType, MessageHeader, MessageType, HEADER_SIZE};
use crate::status::{self, StatusCode};

/// Upper bound on an encoded HEL/ACK/ERR message, per the transport profile.
pub const MAX_HANDSHAKE_MESSAGE_SIZE: u32 = 4096;

/// The client's opening advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: String,
}

impl HelloMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = BinaryWriter::with_capacity(24 + self.endpoint_url.len());
        body.write_u32(self.protocol_version);
        body.write_u32(self.receive_buffer_size);
        body.write_u32(self.send_buffer_size);
        body.write_u32(self.max_message_size);
        body.write_u32(self.max_chunk_count);
        body.write_string(Some(&self.endpoint_url));
        frame(MessageType::Hello, body.into_vec())
    }

    /// Decode from a full framed message (header included).
    pub fn decode(message: &[u8]) -> Result<Self, UaError> {
        let mut reader = body_reader(message, MessageType::Hello)?;
        let hello = Self {
            protocol_version: reader.read_u32()?,
            receive_buffer_size: reader.read_u32()?,
            send_buffer_size: reader.read_u32()?,
            max_message_size: reader.read_u32()?,
            max_chunk_count: reader.read_u32()?,
            endpoint_url: reader
                .read_string()?
                .ok_or_else(|| UaError::new(status::BAD_DECODING_ERROR, "null endpoint url"))?,
        };
        Ok(hello)
    }
}

/// The server's answer to HEL, carrying the values it settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl AcknowledgeMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = BinaryWriter::with_capacity(20);
        body.write_u32(self.protocol_version);
        body.write_u32(self.receive_buffer_size);
        body.write_u32(self.send_buffer_size);
        body.write_u32(self.max_message_size);
        body.write_u32(self.max_chunk_count);
        frame(MessageType::Acknowledge, body.into_vec())
    }

    pub fn decode(message: &[u8]) -> Result<Self, UaError> {
        let mut reader = body_reader(message, MessageType::Acknowledge)?;
        Ok(Self {
            protocol_version: reader.read_u32()?,
            receive_buffer_size: reader.read_u32()?,
            send_buffer_size: reader.read_u32()?,
            max_message_size: reader.read_u32()?,
            max_chunk_count: reader.read_u32()?,
        })
    }
}

/// A fatal transport error, sent before the connection is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub error: StatusCode,
    pub reason: String,
}

impl ErrorMessage {
    pub fn from_error(e: &UaError) -> Self {
        Self {
            error: e.code,
            reason: e.message.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = BinaryWriter::with_capacity(8 + self.reason.len());
        body.write_u32(self.error.0);
        body.write_string(Some(&self.reason));
        frame(MessageType::Error, body.into_vec())
    }

    pub fn decode(message: &[u8]) -> Result<Self, UaError> {
        let mut reader = body_reader(message, MessageType::Error)?;
        Ok(Self {
            error: StatusCode(reader.read_u32()?),
            reason: reader.read_string()?.unwrap_or_default(),
        })
    }
}

/// Wrap a body in the 8-byte header with chunk type `F`.
fn frame(message_type: MessageType, body: Vec<u8>) -> Vec<u8> {
    let header = MessageHeader::new(
        message_type,
        ChunkType::Final,
        (HEADER_SIZE + body.len()) as u32,
    );
    let mut out = header.encode().to_vec();
    out.extend_from_slice(&body);
    out
}

/// Validate the header of a framed message and return a reader over its body.
fn body_reader(message: &[u8], expected: MessageType) -> Result<BinaryReader<'_>, UaError> {
    let header = MessageHeader::decode(message)?;
    if header.message_type != expected {
        return Err(UaError::new(
            status::BAD_TCP_MESSAGE_TYPE_INVALID,
            format!("expected {expected:?}, got {:?}", header.message_type),
        ));
    }
    if header.size as usize != message.len() {
        return Err(UaError::new(
            status::BAD_DECODING_ERROR,
            format!(
                "declared size {} does not match buffer length {}",
                header.size,
                message.len()
            ),
        ));
    }
    let mut reader = BinaryReader::new(message);
    reader.skip(HEADER_SIZE)?;
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_roundtrip() {
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 2_097_152,
            max_chunk_count: 32,
            endpoint_url: "opc.tcp://localhost:12685/test".to_string(),
        };
        let encoded = hello.encode();
        assert_eq!(&encoded[..4], b"HELF");
        assert_eq!(HelloMessage::decode(&encoded).unwrap(), hello);
    }

    #[test]
    fn acknowledge_roundtrip() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 8196,
            send_buffer_size: 8196,
            max_message_size: 65_535,
            max_chunk_count: 16,
        };
        let encoded = ack.encode();
        assert_eq!(&encoded[..4], b"ACKF");
        assert_eq!(encoded.len(), HEADER_SIZE + 20);
        assert_eq!(AcknowledgeMessage::decode(&encoded).unwrap(), ack);
    }

    #[test]
    fn error_roundtrip() {
        let err = ErrorMessage {
            error: status::BAD_TCP_ENDPOINT_URL_INVALID,
            reason: "unrecognized endpoint url: opc.tcp://nowhere".to_string(),
        };
        let encoded = err.encode();
        assert_eq!(&encoded[..4], b"ERRF");
        assert_eq!(ErrorMessage::decode(&encoded).unwrap(), err);
    }

    #[test]
    fn decode_rejects_wrong_type() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 1,
            send_buffer_size: 1,
            max_message_size: 1,
            max_chunk_count: 1,
        };
        let err = HelloMessage::decode(&ack.encode()).unwrap_err();
        assert_eq!(err.code, status::BAD_TCP_MESSAGE_TYPE_INVALID);
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let mut encoded = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 1,
            send_buffer_size: 1,
            max_message_size: 1,
            max_chunk_count: 1,
            endpoint_url: "opc.tcp://h".to_string(),
        }
        .encode();
        encoded.push(0);
        assert!(HelloMessage::decode(&encoded).is_err());
    }

    #[test]
    fn huge_protocol_version_decodes_as_unsigned() {
        // 0xFFFF_FFFF read as signed would be negative; the wire field is
        // unsigned and must survive as a large value.
        let hello = HelloMessage {
            protocol_version: u32::MAX,
            receive_buffer_size: 1,
            send_buffer_size: 1,
            max_message_size: 1,
            max_chunk_count: 1,
            endpoint_url: "opc.tcp://h".to_string(),
        };
        let decoded = HelloMessage::decode(&hello.encode()).unwrap();
        assert_eq!(decoded.protocol_version, u32::MAX);
    }
}
