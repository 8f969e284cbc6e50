use std::collections::HashMap;
use std::time::Duration;

use interconnect_frame::{DEFAULT_MAX_FRAME_SIZE, MIN_FRAME_SIZE};

use crate::descriptor::ProtocolVersion;

/// Default time allowed for the connection handshake.
pub const DEFAULT_ESTABLISH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default time allowed for a session to be accepted or rejected.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default time allowed for a message response.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default bound on a single blocked transport write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Per-connection settings.
///
/// Every connection owns its own copy; negotiating a smaller frame size on one
/// connection never affects another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub establish_timeout: Duration,
    pub session_timeout: Duration,
    pub message_timeout: Duration,
    /// A write blocked longer than this fails the connection. `None` waits
    /// forever.
    pub write_timeout: Option<Duration>,
    /// Local upper bound for a full encoded frame, in bytes.
    pub max_frame_size: usize,
    pub protocol_version: ProtocolVersion,
    /// Key/value data sent with `ConnectionStart`.
    pub data: Option<HashMap<String, String>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            establish_timeout: DEFAULT_ESTABLISH_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            protocol_version: ProtocolVersion::CURRENT,
            data: None,
        }
    }
}

impl ConnectionConfig {
    pub fn with_establish_timeout(mut self, timeout: Duration) -> Self {
        self.establish_timeout = timeout;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// A zero duration is treated as `None`.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    /// Values below the minimum frame size are raised to it.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.max(MIN_FRAME_SIZE);
        self
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_data(mut self, data: HashMap<String, String>) -> Self {
        self.data = Some(data);
        self
    }
}
