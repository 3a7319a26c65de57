//! RTMP wire protocol
//!
//! - Client handshake (C0/C1/C2)
//! - Chunk stream encoding and reassembly
//! - Typed protocol control, command and media messages

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::ClientHandshake;
pub use message::{Command, ConnectParams, RtmpMessage, StatusInfo};
