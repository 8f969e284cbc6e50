use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::security::SecurityConfig;
use crate::traits::{TransportFactory, TransportListener, TransportStream};

/// Plain TCP transport.
///
/// Connects and listens over TCP without encryption. Passing a security
/// configuration is refused with [`TransportError::TlsUnsupported`]; TLS is
/// provided by a separate [`TransportFactory`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransportFactory;

impl TcpTransportFactory {
    pub fn new() -> Self {
        Self
    }

    fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::InvalidAddress {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::InvalidAddress {
                host: host.to_string(),
                port,
                reason: "host resolved to no addresses".to_string(),
            });
        }
        Ok(addrs)
    }

    fn refuse_security(security: Option<&SecurityConfig>) -> Result<()> {
        match security {
            Some(_) => Err(TransportError::TlsUnsupported),
            None => Ok(()),
        }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn connect(
        &self,
        host: &str,
        port: u16,
        security: Option<&SecurityConfig>,
    ) -> Result<TransportStream> {
        Self::refuse_security(security)?;
        let addrs = Self::resolve(host, port)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(%addr, "connected over tcp");
                    return Ok(TransportStream::from_tcp(stream));
                }
                Err(e) => {
                    debug!(%addr, error = %e, "tcp connect attempt failed");
                    last_err = Some(TransportError::Connect {
                        addr: addr.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::InvalidAddress {
            host: host.to_string(),
            port,
            reason: "no address accepted the connection".to_string(),
        }))
    }

    fn listen(
        &self,
        host: &str,
        port: u16,
        security: Option<&SecurityConfig>,
    ) -> Result<Box<dyn TransportListener>> {
        Self::refuse_security(security)?;
        Ok(Box::new(TcpTransportListener::bind(host, port)?))
    }
}

/// A bound, non-blocking TCP listener.
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    /// Bind to the first resolvable address of `host:port` that accepts the bind.
    ///
    /// Port 0 lets the operating system choose; see [`TransportListener::local_addr`].
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addrs = TcpTransportFactory::resolve(host, port)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    listener.set_nonblocking(true)?;
                    info!(addr = %listener.local_addr()?, "listening on tcp");
                    return Ok(Self { listener });
                }
                Err(e) => {
                    last_err = Some(TransportError::Bind {
                        addr: addr.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::InvalidAddress {
            host: host.to_string(),
            port,
            reason: "no address could be bound".to_string(),
        }))
    }
}

impl TransportListener for TcpTransportListener {
    fn accept(&self) -> Result<Option<TransportStream>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                // Accepted sockets may inherit the listener's non-blocking flag.
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                let _ = stream.set_nodelay(true);
                debug!(%addr, "accepted tcp connection");
                Ok(Some(TransportStream::from_tcp(stream)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::Accept(e)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl std::fmt::Debug for TcpTransportListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransportListener")
            .field("addr", &self.listener.local_addr().ok())
            .finish()
    }
}
