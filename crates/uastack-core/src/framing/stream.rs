//! Async message framing over a byte stream.
//!
//! Wraps an [`AsyncRead`] with the [`MessageAccumulator`] so connection
//! loops pull whole framed messages instead of raw bytes.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::UaError;
use crate::framing::accumulator::MessageAccumulator;
use crate::status;

/// Read buffer size for the underlying stream.
const READ_BUFFER: usize = 8192;

pub struct FramedReader<R> {
    inner: R,
    accumulator: MessageAccumulator,
    ready: VecDeque<Vec<u8>>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R, max_message_size: u32) -> Self {
        Self {
            inner,
            accumulator: MessageAccumulator::new(max_message_size),
            ready: VecDeque::new(),
            buf: vec![0u8; READ_BUFFER],
        }
    }

    /// Replace the message size bound, e.g. once negotiation has produced
    /// the real receive buffer size.
    pub fn set_limit(&mut self, max_message_size: u32) {
        self.accumulator = MessageAccumulator::new(max_message_size);
    }

    /// Next whole framed message from the stream.
    ///
    /// # Errors
    ///
    /// `Bad_ConnectionClosed` on EOF or a read error; accumulator errors
    /// (unknown type, oversized declaration) pass through and are fatal.
    pub async fn next(&mut self) -> Result<Vec<u8>, UaError> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(message);
            }
            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                return Err(UaError::new(
                    status::BAD_CONNECTION_CLOSED,
                    "connection closed by peer",
                ));
            }
            self.ready.extend(self.accumulator.feed(&self.buf[..n])?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::messages::HelloMessage;

    fn hello_bytes() -> Vec<u8> {
        HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://localhost:12685/test".to_string(),
        }
        .encode()
    }

    #[tokio::test]
    async fn reads_messages_across_partial_writes() {
        let bytes = hello_bytes();
        let (client, mut server) = tokio::io::duplex(64);
        let mut framed = FramedReader::new(client, 65_535);

        let (first, second) = bytes.split_at(10);
        let first = first.to_vec();
        let second = second.to_vec();
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&first).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            server.write_all(&second).await.unwrap();
        });

        let message = framed.next().await.unwrap();
        assert_eq!(message, hello_bytes());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_reports_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut framed = FramedReader::new(client, 65_535);
        let err = framed.next().await.unwrap_err();
        assert_eq!(err.code, status::BAD_CONNECTION_CLOSED);
    }
}
