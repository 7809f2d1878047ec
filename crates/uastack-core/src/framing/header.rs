//! The 8-byte OPC UA TCP message header.
//!
//! Layout, little-endian: 3 ASCII bytes of message type, one chunk-type
//! byte, and a `u32` total size inclusive of the header itself.

use crate::error::UaError;
use crate::status;

/// Length of the wire header in bytes.
pub const HEADER_SIZE: usize = 8;

/// The protocol version advertised in HEL/ACK.
pub const PROTOCOL_VERSION: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Acknowledge,
    Error,
    OpenSecureChannel,
    CloseSecureChannel,
    SecureMessage,
}

impl MessageType {
    /// The three ASCII bytes identifying this type on the wire.
    #[must_use]
    pub fn wire_bytes(self) -> [u8; 3] {
        match self {
            MessageType::Hello => *b"HEL",
            MessageType::Acknowledge => *b"ACK",
            MessageType::Error => *b"ERR",
            MessageType::OpenSecureChannel => *b"OPN",
            MessageType::CloseSecureChannel => *b"CLO",
            MessageType::SecureMessage => *b"MSG",
        }
    }

    pub fn from_wire_bytes(bytes: [u8; 3]) -> Result<Self, UaError> {
        match &bytes {
            b"HEL" => Ok(MessageType::Hello),
            b"ACK" => Ok(MessageType::Acknowledge),
            b"ERR" => Ok(MessageType::Error),
            b"OPN" => Ok(MessageType::OpenSecureChannel),
            b"CLO" => Ok(MessageType::CloseSecureChannel),
            b"MSG" => Ok(MessageType::SecureMessage),
            _ => Err(UaError::new(
                status::BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("unknown message type: {:?}", String::from_utf8_lossy(&bytes)),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// Intermediate chunk of a multi-chunk message.
    Intermediate,
    /// Final chunk; triggers reassembly.
    Final,
    /// Abort: terminates one in-flight message, not the channel.
    Abort,
}

impl ChunkType {
    #[must_use]
    pub fn wire_byte(self) -> u8 {
        match self {
            ChunkType::Intermediate => b'C',
            ChunkType::Final => b'F',
            ChunkType::Abort => b'A',
        }
    }

    pub fn from_wire_byte(byte: u8) -> Result<Self, UaError> {
        match byte {
            b'C' => Ok(ChunkType::Intermediate),
            b'F' => Ok(ChunkType::Final),
            b'A' => Ok(ChunkType::Abort),
            _ => Err(UaError::new(
                status::BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("unknown chunk type: 0x{byte:02x}"),
            )),
        }
    }
}

/// A decoded 8-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub chunk_type: ChunkType,
    /// Total message size including this header.
    pub size: u32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, chunk_type: ChunkType, size: u32) -> Self {
        Self {
            message_type,
            chunk_type,
            size,
        }
    }

    /// Encode into the fixed 8-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..3].copy_from_slice(&self.message_type.wire_bytes());
        out[3] = self.chunk_type.wire_byte();
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Decode from the first 8 bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, UaError> {
        if data.len() < HEADER_SIZE {
            return Err(UaError::new(
                status::BAD_DECODING_ERROR,
                format!("header needs {HEADER_SIZE} bytes, have {}", data.len()),
            ));
        }
        let message_type =
            MessageType::from_wire_bytes(data[..3].try_into().expect("length checked"))?;
        let chunk_type = ChunkType::from_wire_byte(data[3])?;
        let size = u32::from_le_bytes(data[4..8].try_into().expect("length checked"));
        Ok(Self {
            message_type,
            chunk_type,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = MessageHeader::new(MessageType::SecureMessage, ChunkType::Final, 0x1234);
        let bytes = header.encode();
        assert_eq!(&bytes[..4], b"MSGF");
        assert_eq!(MessageHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn size_is_little_endian() {
        let header = MessageHeader::new(MessageType::Hello, ChunkType::Final, 0x0403_0201);
        assert_eq!(&header.encode()[4..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn all_message_types_roundtrip() {
        for mt in [
            MessageType::Hello,
            MessageType::Acknowledge,
            MessageType::Error,
            MessageType::OpenSecureChannel,
            MessageType::CloseSecureChannel,
            MessageType::SecureMessage,
        ] {
            assert_eq!(MessageType::from_wire_bytes(mt.wire_bytes()).unwrap(), mt);
        }
    }

    #[test]
    fn unknown_message_type_rejected() {
        let err = MessageType::from_wire_bytes(*b"XXX").unwrap_err();
        assert_eq!(err.code, status::BAD_TCP_MESSAGE_TYPE_INVALID);
    }

    #[test]
    fn unknown_chunk_type_rejected() {
        let err = ChunkType::from_wire_byte(b'Z').unwrap_err();
        assert_eq!(err.code, status::BAD_TCP_MESSAGE_TYPE_INVALID);
    }

    #[test]
    fn short_header_rejected() {
        assert!(MessageHeader::decode(b"MSGF\x01").is_err());
    }
}
