//! Point-to-point framed sessions and messages over TCP.
//!
//! # Crate Structure
//!
//! - [`transport`]: stream, listener and factory abstractions plus TCP
//! - [`frame`]: wire format with checksums and resynchronization
//! - [`peer`]: connections, sessions and messages (behind `peer` feature)
//! - [`logging`]: `tracing` subscriber setup (behind `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use interconnect_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use interconnect_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use interconnect_peer::*;
}

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "peer")]
pub use interconnect_peer::{connect, Connection, Listener, Message, PeerError, Session};
