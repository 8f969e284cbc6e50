use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use interconnect_transport::{
    SecurityConfig, TcpTransportFactory, TransportFactory, TransportListener,
};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Role};
use crate::error::{PeerError, Result};
use crate::settle::lock;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct Running {
    stop: Arc<AtomicBool>,
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

/// Accepts inbound transport connections and completes the acceptor side of
/// the handshake for each one.
///
/// Handshakes run on their own threads, so a slow or silent client never
/// delays the next accept. Established connections are handed out through
/// [`accept`](Self::accept).
pub struct Listener {
    host: String,
    port: u16,
    security: Option<SecurityConfig>,
    config: ConnectionConfig,
    factory: Arc<dyn TransportFactory>,
    running: Option<Running>,
    incoming_tx: Sender<Connection>,
    incoming: Mutex<Receiver<Connection>>,
}

impl Listener {
    /// Configure a TCP listener on `host:port`. Port 0 lets the OS choose.
    pub fn new(host: impl Into<String>, port: u16, security: Option<SecurityConfig>) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(PeerError::InvalidArgument("host must not be empty".to_string()));
        }
        let (incoming_tx, incoming) = mpsc::channel();
        Ok(Self {
            host,
            port,
            security,
            config: ConnectionConfig::default(),
            factory: Arc::new(TcpTransportFactory::new()),
            running: None,
            incoming_tx,
            incoming: Mutex::new(incoming),
        })
    }

    /// Settings copied into every accepted connection.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different transport.
    pub fn with_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Bind and start accepting. Starting a running listener does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let transport = self
            .factory
            .listen(&self.host, self.port, self.security.as_ref())?;
        let local_addr = transport.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        let loop_stop = Arc::clone(&stop);
        let config = self.config.clone();
        let incoming = self.incoming_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("listener-{local_addr}"))
            .spawn(move || accept_loop(transport, loop_stop, config, incoming))
            .map_err(|err| PeerError::ConnectionFailed(format!("spawn accept loop: {err}")))?;

        info!(addr = %local_addr, "listener started");
        self.running = Some(Running {
            stop,
            local_addr,
            handle,
        });
        Ok(())
    }

    /// Stop accepting and release the bound address. Connections already
    /// established stay open.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::SeqCst);
            let _ = running.handle.join();
            info!(addr = %running.local_addr, "listener stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Block until the next connection completes its handshake.
    pub fn accept(&self) -> Result<Connection> {
        lock(&self.incoming)
            .recv()
            .map_err(|_| PeerError::Disconnected("listener closed".to_string()))
    }

    /// Like [`accept`](Self::accept), returning `None` on timeout.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<Connection>> {
        match lock(&self.incoming).recv_timeout(timeout) {
            Ok(connection) => Ok(Some(connection)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(PeerError::Disconnected("listener closed".to_string()))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

fn accept_loop(
    transport: Box<dyn TransportListener>,
    stop: Arc<AtomicBool>,
    config: ConnectionConfig,
    incoming: Sender<Connection>,
) {
    while !stop.load(Ordering::SeqCst) {
        match transport.accept() {
            Ok(Some(stream)) => {
                let config = config.clone();
                let incoming = incoming.clone();
                let peer = stream.peer_addr();
                let spawned = thread::Builder::new()
                    .name("listener-handshake".to_string())
                    .spawn(move || match Connection::establish(stream, Role::Acceptor, config) {
                        Ok(connection) => {
                            debug!(conn = %connection.id(), peer = ?peer, "accepted connection");
                            if incoming.send(connection).is_err() {
                                debug!("listener gone, dropping accepted connection");
                            }
                        }
                        Err(err) => warn!(peer = ?peer, error = %err, "inbound handshake failed"),
                    });
                if let Err(err) = spawned {
                    warn!(error = %err, "failed to spawn handshake thread");
                }
            }
            Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::connector::{connect, connect_with_config};

    const WAIT: Duration = Duration::from_secs(5);

    fn started(config: ConnectionConfig) -> (Listener, u16) {
        let mut listener = Listener::new("127.0.0.1", 0, None)
            .expect("listener should build")
            .with_config(config);
        listener.start().expect("listener should start");
        let port = listener.local_addr().expect("listener should be bound").port();
        (listener, port)
    }

    #[test]
    fn accept_returns_open_connection() {
        let (listener, port) = started(ConnectionConfig::default());
        let client = connect("127.0.0.1", port, None, None).expect("client should connect");
        let server = listener
            .accept_timeout(WAIT)
            .expect("accept")
            .expect("connection should arrive");

        assert_eq!(server.state(), ConnectionState::Open);
        assert_eq!(server.role(), Role::Acceptor);
        assert_eq!(client.role(), Role::Initiator);
        assert!(server.peer_addr().is_some());
    }

    #[test]
    fn accepts_multiple_connections() {
        let (listener, port) = started(ConnectionConfig::default());
        let _c1 = connect("127.0.0.1", port, None, None).expect("first client should connect");
        let _c2 = connect("127.0.0.1", port, None, None).expect("second client should connect");

        let first = listener.accept_timeout(WAIT).expect("accept").expect("first");
        let second = listener.accept_timeout(WAIT).expect("accept").expect("second");
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn accept_timeout_without_clients() {
        let (listener, _port) = started(ConnectionConfig::default());
        assert!(listener
            .accept_timeout(Duration::from_millis(50))
            .expect("accept")
            .is_none());
    }

    #[test]
    fn frame_size_is_negotiated_per_connection() {
        let (listener, port) = started(ConnectionConfig::default());

        let small = connect_with_config(
            "127.0.0.1",
            port,
            None,
            ConnectionConfig::default().with_max_frame_size(1024),
        )
        .expect("small client should connect");
        let small_server = listener.accept_timeout(WAIT).expect("accept").expect("small");

        let large = connect("127.0.0.1", port, None, None).expect("large client should connect");
        let large_server = listener.accept_timeout(WAIT).expect("accept").expect("large");

        assert_eq!(small.max_frame_size(), 1024);
        assert_eq!(small_server.max_frame_size(), 1024);
        assert_eq!(large.max_frame_size(), 128 * 1024);
        assert_eq!(large_server.max_frame_size(), 128 * 1024);
    }

    #[test]
    fn stop_releases_listener() {
        let (mut listener, port) = started(ConnectionConfig::default());
        listener.start().expect("second start is a no-op");
        listener.stop();
        assert!(!listener.is_running());
        assert!(listener.local_addr().is_none());
        assert!(connect("127.0.0.1", port, None, None).is_err());
    }

    #[test]
    fn empty_host_rejected() {
        assert!(matches!(
            Listener::new("", 0, None),
            Err(PeerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn security_refused_on_start() {
        let mut listener = Listener::new("127.0.0.1", 0, Some(SecurityConfig::default()))
            .expect("listener should build");
        assert!(matches!(listener.start(), Err(PeerError::Transport(_))));
        assert!(!listener.is_running());
    }
}
