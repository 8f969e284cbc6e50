use std::time::Duration;

use bytes::Bytes;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] interconnect_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] interconnect_frame::FrameError),

    /// Descriptor serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A constructor or call received an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection handshake did not complete in time.
    #[error("connection establishment timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The remote endpoint rejected the connection.
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),

    /// The connection is not in the `Open` state.
    #[error("connection is not open")]
    NotOpen,

    /// The remote endpoint rejected the session.
    #[error("session {session_id} rejected by remote endpoint")]
    SessionRejected { session_id: u32, data: Bytes },

    /// The session handshake did not complete in time.
    #[error("session settlement timed out after {0:?}")]
    SessionTimeout(Duration),

    /// The session is not in the `Open` state.
    #[error("session {0} is not open")]
    SessionNotOpen(u32),

    /// No response to a message arrived in time.
    #[error("message settlement timed out after {0:?}")]
    MessageTimeout(Duration),

    /// Every identifier up to the configured maximum is in use.
    #[error("identifier space exhausted (max {max})")]
    IdSpaceExhausted { max: u32 },

    /// The connection or session went away.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
