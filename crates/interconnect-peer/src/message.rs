use std::sync::Weak;

use bytes::Bytes;
use interconnect_frame::FrameType;

use crate::error::{PeerError, Result};
use crate::session::SessionInner;

/// How the remote endpoint settled a message sent with
/// [`Session::send`](crate::Session::send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub accepted: bool,
    pub data: Bytes,
}

/// A message received from the remote endpoint.
///
/// Answer it exactly once with [`accept`](Self::accept) or
/// [`reject`](Self::reject); the sender stays blocked until then or until its
/// message timeout elapses.
pub struct Message {
    session: Weak<SessionInner>,
    session_id: u32,
    id: u32,
    payload: Bytes,
}

impl Message {
    pub(crate) fn new(session: Weak<SessionInner>, session_id: u32, id: u32, payload: Bytes) -> Self {
        Self {
            session,
            session_id,
            id,
            payload,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn accept(self, data: &[u8]) -> Result<()> {
        self.respond(FrameType::MessageAccept, data)
    }

    pub fn reject(self, data: &[u8]) -> Result<()> {
        self.respond(FrameType::MessageReject, data)
    }

    fn respond(&self, kind: FrameType, data: &[u8]) -> Result<()> {
        let session = self
            .session
            .upgrade()
            .ok_or(PeerError::SessionNotOpen(self.session_id))?;
        session.respond(kind, self.id, data)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("session_id", &self.session_id)
            .field("id", &self.id)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}
