//! Connection, session and message state machines for the interconnect
//! protocol.
//!
//! A [`Connection`] is one endpoint of a point-to-point link. Either side can
//! open named [`Session`]s over it, and either side of a session can send
//! [`Message`]s that the other side accepts or rejects. Use [`connect`] to
//! dial a remote [`Listener`].

pub mod allocator;
pub mod config;
pub mod connection;
pub mod connector;
pub mod descriptor;
pub mod error;
pub mod listener;
pub mod message;
pub mod session;
mod settle;

pub use allocator::{IdAllocator, ID_STRIDE};
pub use config::{
    ConnectionConfig, DEFAULT_ESTABLISH_TIMEOUT, DEFAULT_MESSAGE_TIMEOUT, DEFAULT_SESSION_TIMEOUT,
};
pub use connection::{Connection, ConnectionEvent, ConnectionState, Role};
pub use connector::{connect, connect_with_config, connect_with_factory};
pub use descriptor::{ConnectionDescriptor, ProtocolVersion, SessionDescriptor};
pub use error::{PeerError, Result};
pub use listener::Listener;
pub use message::{Message, Response};
pub use session::{Direction, Session, SessionState};
