/// Errors that can occur during frame encoding/decoding.
///
/// Corrupt bytes on the wire are not errors: the scanner skips them.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The requested scan window does not lie inside the buffer.
    #[error("scan window {offset}+{available} exceeds buffer of {len} bytes")]
    InvalidRange {
        offset: usize,
        available: usize,
        len: usize,
    },

    /// The encoded frame exceeds the negotiated maximum frame size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end-of-file.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
