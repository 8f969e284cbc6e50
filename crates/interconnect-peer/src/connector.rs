use std::collections::HashMap;

use interconnect_transport::{SecurityConfig, TcpTransportFactory, TransportFactory};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Role};
use crate::error::{PeerError, Result};

/// Connect to a listening endpoint over TCP with default settings.
pub fn connect(
    host: &str,
    port: u16,
    security: Option<&SecurityConfig>,
    data: Option<HashMap<String, String>>,
) -> Result<Connection> {
    let config = ConnectionConfig {
        data,
        ..ConnectionConfig::default()
    };
    connect_with_config(host, port, security, config)
}

/// Connect over TCP with explicit configuration.
pub fn connect_with_config(
    host: &str,
    port: u16,
    security: Option<&SecurityConfig>,
    config: ConnectionConfig,
) -> Result<Connection> {
    connect_with_factory(&TcpTransportFactory::new(), host, port, security, config)
}

/// Connect through any transport factory.
pub fn connect_with_factory(
    factory: &dyn TransportFactory,
    host: &str,
    port: u16,
    security: Option<&SecurityConfig>,
    config: ConnectionConfig,
) -> Result<Connection> {
    if host.is_empty() {
        return Err(PeerError::InvalidArgument("host must not be empty".to_string()));
    }
    if port == 0 {
        return Err(PeerError::InvalidArgument(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    let stream = factory
        .connect(host, port, security)
        .map_err(|err| PeerError::ConnectionFailed(err.to_string()))?;
    debug!(host, port, "transport connected");
    Connection::establish(stream, Role::Initiator, config)
}
