use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{FrameError, Result};

/// Magic tag opening every frame: ASCII `INTERC`.
pub const MAGIC: [u8; 6] = *b"INTERC";

/// Magic (6) + length (4) + type (1) + extension length (1).
pub const HEADER_SIZE: usize = 12;

/// Session id (4) + message id (4).
pub const EXTENSION_SIZE: usize = 8;

/// Trailing CRC32.
pub const CHECKSUM_SIZE: usize = 4;

/// Smallest possible frame: header and checksum, no extension, empty payload.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Default negotiated maximum frame size: 128 KiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 128 * 1024;

const LENGTH_OFFSET: usize = 6;
const TYPE_OFFSET: usize = 10;
const EXTENSION_LEN_OFFSET: usize = 11;

/// The thirteen frame kinds, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    ConnectionStart = 0,
    ConnectionAccept = 1,
    ConnectionReject = 2,
    ConnectionOpen = 3,
    ConnectionClose = 4,
    SessionStart = 5,
    SessionAccept = 6,
    SessionReject = 7,
    SessionOpen = 8,
    SessionClose = 9,
    MessageSend = 10,
    MessageAccept = 11,
    MessageReject = 12,
}

impl FrameType {
    /// Map a wire byte to a frame type.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::ConnectionStart,
            1 => Self::ConnectionAccept,
            2 => Self::ConnectionReject,
            3 => Self::ConnectionOpen,
            4 => Self::ConnectionClose,
            5 => Self::SessionStart,
            6 => Self::SessionAccept,
            7 => Self::SessionReject,
            8 => Self::SessionOpen,
            9 => Self::SessionClose,
            10 => Self::MessageSend,
            11 => Self::MessageAccept,
            12 => Self::MessageReject,
            _ => return None,
        })
    }

    /// Session- and message-scoped frames carry the session/message id extension.
    pub fn has_extension(self) -> bool {
        self as u8 >= Self::SessionStart as u8
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    /// Zero for connection-scoped frames.
    pub session_id: u32,
    /// Zero for connection- and session-scoped frames.
    pub message_id: u32,
    pub payload: Bytes,
}

impl Frame {
    /// A connection-scoped frame.
    pub fn connection(kind: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            session_id: 0,
            message_id: 0,
            payload: payload.into(),
        }
    }

    /// A session-scoped frame.
    pub fn session(kind: FrameType, session_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            session_id,
            message_id: 0,
            payload: payload.into(),
        }
    }

    /// A message-scoped frame.
    pub fn message(
        kind: FrameType,
        session_id: u32,
        message_id: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            session_id,
            message_id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        wire_size(self.kind, self.payload.len())
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(
            self.kind,
            self.session_id,
            self.message_id,
            &self.payload,
            dst,
        )
    }
}

fn wire_size(kind: FrameType, payload_len: usize) -> usize {
    let extension = if kind.has_extension() {
        EXTENSION_SIZE
    } else {
        0
    };
    HEADER_SIZE + extension + payload_len + CHECKSUM_SIZE
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌──────────┬──────────┬──────┬─────────┬─────────────┬─────────────┬─────────┬──────────┐
/// │ "INTERC" │ Length   │ Type │ ExtLen  │ Session id  │ Message id  │ Payload │ CRC32    │
/// │ (6B)     │ (4B LE)  │ (1B) │ (1B)    │ (4B LE)     │ (4B LE)     │         │ (4B BE)  │
/// │          │          │      │ 0 or 2  │ iff ExtLen  │ iff ExtLen  │         │          │
/// └──────────┴──────────┴──────┴─────────┴─────────────┴─────────────┴─────────┴──────────┘
/// ```
///
/// The ids are ignored for connection-scoped frame types.
pub fn encode_frame(
    kind: FrameType,
    session_id: u32,
    message_id: u32,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let size = wire_size(kind, payload.len());
    let length = u32::try_from(size).map_err(|_| FrameError::FrameTooLarge {
        size,
        max: u32::MAX as usize,
    })?;

    let start = dst.len();
    dst.reserve(size);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(length);
    dst.put_u8(kind as u8);
    if kind.has_extension() {
        dst.put_u8((EXTENSION_SIZE / 4) as u8);
        dst.put_u32_le(session_id);
        dst.put_u32_le(message_id);
    } else {
        dst.put_u8(0);
    }
    dst.put_slice(payload);

    let crc = crc32fast::hash(&dst[start..]);
    dst.put_u32(crc);
    Ok(())
}

/// Result of scanning a buffer window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Complete, checksum-valid frames in stream order.
    pub frames: Vec<Frame>,
    /// Start of the unconsumed bytes, or 0 when nothing is left.
    pub offset: usize,
    /// Number of unconsumed bytes starting at `offset`.
    pub available: usize,
}

/// Outcome of inspecting the bytes at one scan position.
pub(crate) enum Scan {
    /// A verified frame spanning this many bytes.
    Frame(Frame, usize),
    /// Not a frame start; discard this many bytes.
    Skip(usize),
    /// Possibly a frame that has not fully arrived.
    Incomplete,
}

/// Inspect the start of `window` for a frame no longer than `max_frame_size`.
pub(crate) fn scan(window: &[u8], max_frame_size: usize) -> Scan {
    if window.len() < MAGIC.len() {
        return if MAGIC.starts_with(window) {
            Scan::Incomplete
        } else {
            Scan::Skip(1)
        };
    }
    if window[..MAGIC.len()] != MAGIC {
        return Scan::Skip(1);
    }
    if window.len() < HEADER_SIZE {
        return Scan::Incomplete;
    }

    let mut length_bytes = [0u8; 4];
    length_bytes.copy_from_slice(&window[LENGTH_OFFSET..TYPE_OFFSET]);
    let length = u32::from_le_bytes(length_bytes) as usize;
    if !(MIN_FRAME_SIZE..=max_frame_size).contains(&length) {
        return Scan::Skip(1);
    }
    if window.len() < length {
        return Scan::Incomplete;
    }

    // The length field is only trusted once the checksum verifies.
    let body = &window[..length - CHECKSUM_SIZE];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&window[length - CHECKSUM_SIZE..length]);
    if crc32fast::hash(body) != u32::from_be_bytes(crc_bytes) {
        return Scan::Skip(1);
    }

    let extension = window[EXTENSION_LEN_OFFSET] as usize * 4;
    if (extension != 0 && extension != EXTENSION_SIZE) || HEADER_SIZE + extension > body.len() {
        return Scan::Skip(1);
    }

    let Some(kind) = FrameType::from_u8(window[TYPE_OFFSET]) else {
        warn!(
            kind = window[TYPE_OFFSET],
            length, "skipping frame of unknown type"
        );
        return Scan::Skip(length);
    };

    let (session_id, message_id) = if extension > 0 {
        let mut id = [0u8; 4];
        id.copy_from_slice(&window[HEADER_SIZE..HEADER_SIZE + 4]);
        let session_id = u32::from_le_bytes(id);
        id.copy_from_slice(&window[HEADER_SIZE + 4..HEADER_SIZE + 8]);
        (session_id, u32::from_le_bytes(id))
    } else {
        (0, 0)
    };

    let payload = Bytes::copy_from_slice(&body[HEADER_SIZE + extension..]);
    Scan::Frame(
        Frame {
            kind,
            session_id,
            message_id,
            payload,
        },
        length,
    )
}

/// Scan `buf[offset..offset + available]` for complete frames.
///
/// Bytes that cannot start a valid frame are skipped one at a time. The scan
/// stops at the first candidate that has not fully arrived; its position is
/// reported so the caller can append further reads after it. When every byte
/// was consumed the reported offset is 0.
pub fn decode_buffer(buf: &[u8], offset: usize, available: usize) -> Result<Decoded> {
    decode_buffer_with_limit(buf, offset, available, usize::MAX)
}

/// Like [`decode_buffer`], but a candidate declaring a length above
/// `max_frame_size` is skipped at once instead of waiting for more bytes.
pub fn decode_buffer_with_limit(
    buf: &[u8],
    offset: usize,
    available: usize,
    max_frame_size: usize,
) -> Result<Decoded> {
    let end = offset
        .checked_add(available)
        .filter(|end| *end <= buf.len())
        .ok_or(FrameError::InvalidRange {
            offset,
            available,
            len: buf.len(),
        })?;

    let mut frames = Vec::new();
    let mut pos = offset;
    while pos < end {
        match scan(&buf[pos..end], max_frame_size) {
            Scan::Frame(frame, len) => {
                frames.push(frame);
                pos += len;
            }
            Scan::Skip(len) => pos += len,
            Scan::Incomplete => break,
        }
    }

    let available = end - pos;
    Ok(Decoded {
        frames,
        offset: if available == 0 { 0 } else { pos },
        available,
    })
}
