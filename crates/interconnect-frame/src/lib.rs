//! Wire framing for the interconnect protocol.
//!
//! Every frame on the wire is laid out as:
//! - the 6-byte magic tag `INTERC`, used to resynchronize after corruption
//! - a 4-byte little-endian total length (the whole frame, trailer included)
//! - a 1-byte frame type and a 1-byte extension length (in 4-byte words)
//! - for session and message frames, the session id and message id
//! - the payload
//! - a CRC32 over everything before it, written big-endian
//!
//! Decoding never fails on bad bytes. The scanner walks forward one byte at a
//! time until it finds a magic tag whose checksum verifies.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_buffer, decode_buffer_with_limit, encode_frame, Decoded, Frame, FrameType, DEFAULT_MAX_FRAME_SIZE, MAGIC,
    MIN_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::InterconnectCodec;
