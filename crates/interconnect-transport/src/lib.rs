//! Transport layer for interconnect.
//!
//! Provides the byte streams the protocol engine runs over:
//! - TCP streams and listeners (the default [`TcpTransportFactory`])
//! - Unix socket pairs for in-process use (unix only)
//! - The [`TransportFactory`] seam through which TLS or test transports are injected
//!
//! This is the lowest layer of interconnect. Everything else builds on top of
//! the [`TransportStream`] type provided here.

pub mod error;
pub mod security;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use security::{CertificateAttributes, SecurityConfig};
pub use tcp::{TcpTransportFactory, TcpTransportListener};
pub use traits::{TransportFactory, TransportListener, TransportStream};
