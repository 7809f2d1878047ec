//! Streaming accumulator for length-prefixed OPC UA TCP messages.
//!
//! Buffers incoming stream data and slices out whole messages once
//! `readable >= 8 && readable >= declared size`. A message declaring a size
//! larger than the local receive buffer is rejected before its body is
//! buffered any further; an unknown message type fails the connection.

use crate::error::UaError;
use crate::framing::header::{MessageHeader, HEADER_SIZE};
use crate::status;

/// Stateful buffer that extracts complete framed messages from a byte
/// stream. One accumulator per connection direction.
pub struct MessageAccumulator {
    buffer: Vec<u8>,
    /// Upper bound on a single message's declared size.
    max_message_size: u32,
}

impl MessageAccumulator {
    pub fn new(max_message_size: u32) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_message_size,
        }
    }

    /// Feed new stream data and extract every complete message.
    ///
    /// Returned vectors contain the full message including its 8-byte
    /// header.
    ///
    /// # Errors
    ///
    /// `Bad_TcpMessageTypeInvalid` for an unrecognized header and
    /// `Bad_TcpMessageTooLarge` for a declared size exceeding the limit;
    /// both are fatal to the connection and leave the accumulator
    /// unusable by contract.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, UaError> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();

        while self.buffer.len() >= HEADER_SIZE {
            let header = MessageHeader::decode(&self.buffer)?;

            if header.size < HEADER_SIZE as u32 {
                return Err(UaError::new(
                    status::BAD_TCP_MESSAGE_TYPE_INVALID,
                    format!("declared size {} smaller than header", header.size),
                ));
            }
            if header.size > self.max_message_size {
                return Err(UaError::new(
                    status::BAD_TCP_MESSAGE_TOO_LARGE,
                    format!(
                        "declared size {} exceeds receive buffer {}",
                        header.size, self.max_message_size
                    ),
                ));
            }

            let size = header.size as usize;
            if self.buffer.len() < size {
                break;
            }

            messages.push(self.buffer[..size].to_vec());
            self.buffer.drain(..size);
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::header::{ChunkType, MessageType};

    fn frame(message_type: MessageType, body: &[u8]) -> Vec<u8> {
        let header = MessageHeader::new(
            message_type,
            ChunkType::Final,
            (HEADER_SIZE + body.len()) as u32,
        );
        let mut out = header.encode().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn single_complete_message() {
        let mut acc = MessageAccumulator::new(65_535);
        let msg = frame(MessageType::Hello, &[0xAA; 20]);

        let out = acc.feed(&msg).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], msg);
    }

    #[test]
    fn message_split_across_reads() {
        let mut acc = MessageAccumulator::new(65_535);
        let msg = frame(MessageType::SecureMessage, &[0x42; 50]);

        let out1 = acc.feed(&msg[..5]).unwrap();
        assert!(out1.is_empty());

        let out2 = acc.feed(&msg[5..30]).unwrap();
        assert!(out2.is_empty());

        let out3 = acc.feed(&msg[30..]).unwrap();
        assert_eq!(out3.len(), 1);
        assert_eq!(out3[0], msg);
    }

    #[test]
    fn multiple_messages_in_one_read() {
        let mut acc = MessageAccumulator::new(65_535);
        let m1 = frame(MessageType::Hello, &[1; 10]);
        let m2 = frame(MessageType::Acknowledge, &[2; 15]);

        let mut data = m1.clone();
        data.extend_from_slice(&m2);

        let out = acc.feed(&data).unwrap();
        assert_eq!(out, vec![m1, m2]);
    }

    #[test]
    fn unknown_type_fails_connection() {
        let mut acc = MessageAccumulator::new(65_535);
        let err = acc.feed(b"XYZF\x08\x00\x00\x00").unwrap_err();
        assert_eq!(err.code, status::BAD_TCP_MESSAGE_TYPE_INVALID);
    }

    #[test]
    fn oversized_declared_size_rejected_before_body() {
        let mut acc = MessageAccumulator::new(100);
        let header = MessageHeader::new(MessageType::SecureMessage, ChunkType::Final, 101);
        // Only the header arrives; the rejection must not wait for the body.
        let err = acc.feed(&header.encode()).unwrap_err();
        assert_eq!(err.code, status::BAD_TCP_MESSAGE_TOO_LARGE);
    }

    #[test]
    fn size_equal_to_limit_accepted() {
        let limit = (HEADER_SIZE + 16) as u32;
        let mut acc = MessageAccumulator::new(limit);
        let msg = frame(MessageType::SecureMessage, &[0; 16]);
        assert_eq!(msg.len() as u32, limit);

        let out = acc.feed(&msg).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn size_smaller_than_header_rejected() {
        let mut acc = MessageAccumulator::new(65_535);
        let mut bytes = MessageHeader::new(MessageType::Hello, ChunkType::Final, 8).encode();
        bytes[4] = 3; // declared size 3 < 8
        let err = acc.feed(&bytes).unwrap_err();
        assert_eq!(err.code, status::BAD_TCP_MESSAGE_TYPE_INVALID);
    }
}
