//! OPC UA TCP framing: the 8-byte header, stream accumulation, and the
//! unsecured HEL/ACK/ERR handshake messages.

pub mod accumulator;
pub mod header;
pub mod messages;
pub mod stream;

pub use accumulator::MessageAccumulator;
pub use header::{ChunkType, MessageHeader, MessageType, HEADER_SIZE, PROTOCOL_VERSION};
pub use messages::{AcknowledgeMessage, ErrorMessage, HelloMessage};
pub use stream::FramedReader;
