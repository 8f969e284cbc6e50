use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;
use crate::security::SecurityConfig;

/// A connected byte stream implementing Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Clones made with [`TransportStream::try_clone`] share the underlying socket,
/// so one clone can read while another writes and a third shuts it down.
pub struct TransportStream {
    inner: TransportStreamInner,
}

enum TransportStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for TransportStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            TransportStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for TransportStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            TransportStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            TransportStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl TransportStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: TransportStreamInner::Tcp(stream),
        }
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: TransportStreamInner::Unix(stream),
        }
    }

    /// Create a connected in-process pair of streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            TransportStreamInner::Tcp(stream) => stream.set_write_timeout(timeout)?,
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.set_write_timeout(timeout)?,
        }
        Ok(())
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            TransportStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both directions of the stream.
    ///
    /// A thread blocked in `read` on any clone of this stream returns with
    /// end-of-stream once this completes.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            TransportStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both)?,
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both)?,
        }
        Ok(())
    }

    /// Remote address for TCP streams.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.inner {
            TransportStreamInner::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            TransportStreamInner::Unix(_) => None,
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            TransportStreamInner::Tcp(stream) => f
                .debug_struct("TransportStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
            #[cfg(unix)]
            TransportStreamInner::Unix(_) => f
                .debug_struct("TransportStream")
                .field("type", &"unix")
                .finish(),
        }
    }
}

/// A bound listener that hands out accepted streams.
pub trait TransportListener: Send {
    /// Accept a pending connection without blocking.
    ///
    /// Returns `Ok(None)` when no connection is waiting.
    fn accept(&self) -> Result<Option<TransportStream>>;

    /// The address the listener is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Builds transports for connections and listeners.
///
/// Passed explicitly into listeners and connectors so that TLS or test
/// transports can be substituted per instance.
pub trait TransportFactory: Send + Sync {
    /// Open a stream to `host:port`.
    fn connect(
        &self,
        host: &str,
        port: u16,
        security: Option<&SecurityConfig>,
    ) -> Result<TransportStream>;

    /// Bind a listener on `host:port`.
    fn listen(
        &self,
        host: &str,
        port: u16,
        security: Option<&SecurityConfig>,
    ) -> Result<Box<dyn TransportListener>>;
}
