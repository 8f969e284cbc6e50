use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use interconnect_frame::{Frame, FrameError, FrameReader, FrameType, FrameWriter, MIN_FRAME_SIZE};
use interconnect_transport::{SecurityConfig, TransportStream};
use tracing::{debug, info, warn};

use crate::allocator::IdAllocator;
use crate::config::ConnectionConfig;
use crate::descriptor::{ConnectionDescriptor, SessionDescriptor};
use crate::error::{PeerError, Result};
use crate::session::{Direction, Outcome, Session};
use crate::settle::lock;

const VERSION_INCOMPATIBLE: &str = "Protocol version incompatible";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Acceptor,
}

impl Role {
    /// First id of this side's lattice: initiators allocate even ids,
    /// acceptors odd ones.
    pub fn id_start(self) -> u32 {
        match self {
            Role::Initiator => 0,
            Role::Acceptor => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Start,
    StartSent,
    AcceptSent,
    /// Reserved; never entered.
    OpenSent,
    Open,
    End,
    Error,
}

impl ConnectionState {
    pub fn is_finished(self) -> bool {
        matches!(self, ConnectionState::End | ConnectionState::Error)
    }
}

/// Notifications raised by a connection, delivered in order.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The remote endpoint asked to open a session. Settle it with
    /// [`Session::accept`] or [`Session::reject`].
    SessionOffered(Session),
    /// The remote endpoint closed the connection.
    Closed,
    /// The connection failed; no further events follow.
    Error(String),
}

#[derive(Default)]
struct SessionTable {
    pending: HashMap<u32, Session>,
    active: HashMap<u32, Session>,
}

pub(crate) struct ConnectionInner {
    this: Weak<ConnectionInner>,
    id: String,
    role: Role,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    writer: Mutex<FrameWriter<TransportStream>>,
    stream: TransportStream,
    max_frame_size: AtomicUsize,
    session_ids: Mutex<IdAllocator>,
    sessions: Mutex<SessionTable>,
    peer_data: Mutex<Option<HashMap<String, String>>>,
    failure: Mutex<Option<String>>,
    events: Mutex<Option<Sender<ConnectionEvent>>>,
    cancelled: AtomicBool,
}

/// One endpoint of an established point-to-point link.
///
/// A background thread decodes inbound frames and drives the connection,
/// session and message state machines. Dropping the connection closes it and
/// joins that thread.
pub struct Connection {
    inner: Arc<ConnectionInner>,
    events: Mutex<Receiver<ConnectionEvent>>,
    decoder: Option<JoinHandle<()>>,
}

impl Connection {
    /// Connect to `host:port` over TCP and complete the handshake.
    pub fn connect(
        host: &str,
        port: u16,
        security: Option<&SecurityConfig>,
        data: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        crate::connector::connect(host, port, security, data)
    }

    /// Run the handshake for `role` over an already connected stream.
    ///
    /// Blocks until the connection is `Open` or the establish timeout
    /// elapses.
    pub fn establish(stream: TransportStream, role: Role, config: ConnectionConfig) -> Result<Self> {
        let id = format!("conn-{}", NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let max_frame_size = config.max_frame_size.max(MIN_FRAME_SIZE);
        stream.set_write_timeout(config.write_timeout)?;
        let reader_stream = stream.try_clone()?;
        let control_stream = stream.try_clone()?;
        let (events_tx, events_rx) = mpsc::channel();

        let inner = Arc::new_cyclic(move |this| ConnectionInner {
            this: this.clone(),
            id,
            role,
            session_ids: Mutex::new(IdAllocator::interleaved(role.id_start())),
            writer: Mutex::new(FrameWriter::with_max_frame_size(stream, max_frame_size)),
            stream: control_stream,
            max_frame_size: AtomicUsize::new(max_frame_size),
            state: Mutex::new(ConnectionState::Start),
            state_changed: Condvar::new(),
            sessions: Mutex::new(SessionTable::default()),
            peer_data: Mutex::new(None),
            failure: Mutex::new(None),
            events: Mutex::new(Some(events_tx)),
            cancelled: AtomicBool::new(false),
            config,
        });

        let reader = FrameReader::with_max_frame_size(reader_stream, max_frame_size);
        let decode_inner = Arc::clone(&inner);
        let decoder = thread::Builder::new()
            .name(format!("{}-decode", inner.id))
            .spawn(move || decode_loop(decode_inner, reader))
            .map_err(|err| PeerError::ConnectionFailed(format!("spawn decoder: {err}")))?;

        let connection = Self {
            inner,
            events: Mutex::new(events_rx),
            decoder: Some(decoder),
        };

        if role == Role::Initiator {
            connection.inner.start()?;
        }
        connection.wait_established()?;
        info!(
            conn = %connection.inner.id,
            role = ?role,
            max_frame_size = connection.max_frame_size(),
            "connection open"
        );
        Ok(connection)
    }

    fn wait_established(&self) -> Result<()> {
        let timeout = self.inner.config.establish_timeout;
        let state = {
            let guard = lock(&self.inner.state);
            let (guard, _) = self
                .inner
                .state_changed
                .wait_timeout_while(guard, timeout, |s| {
                    *s != ConnectionState::Open && !s.is_finished()
                })
                .unwrap_or_else(PoisonError::into_inner);
            *guard
        };

        let reason = || {
            lock(&self.inner.failure)
                .clone()
                .unwrap_or_else(|| "connection closed during handshake".to_string())
        };
        match state {
            ConnectionState::Open => Ok(()),
            ConnectionState::End if self.inner.role == Role::Initiator => {
                Err(PeerError::ConnectionRejected(reason()))
            }
            ConnectionState::End | ConnectionState::Error => {
                Err(PeerError::ConnectionFailed(reason()))
            }
            _ => Err(PeerError::ConnectionTimeout(timeout)),
        }
    }

    /// Open a session and wait for the remote endpoint to settle it.
    pub fn create_session(&self, name: &str, data: Option<&[u8]>) -> Result<Session> {
        self.inner.create_session(name, data)
    }

    /// Close the connection. Closing an ended connection does nothing.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Block until the next event. Fails once the connection has finished and
    /// every queued event was delivered.
    pub fn recv_event(&self) -> Result<ConnectionEvent> {
        lock(&self.events)
            .recv()
            .map_err(|_| PeerError::Disconnected(format!("{} finished", self.inner.id)))
    }

    /// Like [`recv_event`](Self::recv_event), returning `None` on timeout.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<Option<ConnectionEvent>> {
        match lock(&self.events).recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(PeerError::Disconnected(format!("{} finished", self.inner.id)))
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn is_initiator(&self) -> bool {
        self.inner.role == Role::Initiator
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Negotiated maximum frame size for this connection.
    pub fn max_frame_size(&self) -> usize {
        self.inner.max_frame_size()
    }

    /// Data the initiator sent with `ConnectionStart` (acceptor side only).
    pub fn peer_data(&self) -> Option<HashMap<String, String>> {
        lock(&self.inner.peer_data).clone()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.stream.peer_addr()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Sessions awaiting settlement.
    pub fn pending_sessions(&self) -> usize {
        lock(&self.inner.sessions).pending.len()
    }

    /// Sessions that completed their handshake.
    pub fn active_sessions(&self) -> usize {
        lock(&self.inner.sessions).active.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.inner.state())
            .field("max_frame_size", &self.inner.max_frame_size())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.inner.close() {
            debug!(conn = %self.inner.id, error = %err, "close on drop failed");
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _ = self.inner.stream.shutdown();
        if let Some(decoder) = self.decoder.take() {
            let _ = decoder.join();
        }
    }
}

fn decode_loop(inner: Arc<ConnectionInner>, mut reader: FrameReader<TransportStream>) {
    debug!(conn = %inner.id, "decoder started");
    loop {
        if inner.cancelled.load(Ordering::SeqCst) || inner.state().is_finished() {
            break;
        }
        match reader.read_frames() {
            Ok(frames) => {
                for frame in frames {
                    inner.process_frame(frame);
                    if inner.state().is_finished() {
                        break;
                    }
                }
                let negotiated = inner.max_frame_size();
                if negotiated != reader.max_frame_size() {
                    reader.set_max_frame_size(negotiated);
                }
            }
            Err(err) => {
                if !inner.cancelled.load(Ordering::SeqCst) && !inner.state().is_finished() {
                    let reason = match err {
                        FrameError::ConnectionClosed => "stream closed by remote".to_string(),
                        other => format!("read failed: {other}"),
                    };
                    inner.fail(reason);
                }
                break;
            }
        }
    }
    debug!(conn = %inner.id, "decoder stopped");
}

impl ConnectionInner {
    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        self.this.clone()
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Move to `state` unless the connection already finished.
    fn advance(&self, state: ConnectionState) -> bool {
        let mut current = lock(&self.state);
        if current.is_finished() {
            return false;
        }
        *current = state;
        self.state_changed.notify_all();
        true
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size.load(Ordering::SeqCst)
    }

    fn adopt_max_frame_size(&self, remote: usize) {
        let local = self.max_frame_size();
        if remote >= MIN_FRAME_SIZE && remote < local {
            debug!(conn = %self.id, local, remote, "adopting smaller max frame size");
            self.max_frame_size.store(remote, Ordering::SeqCst);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(events) = lock(&self.events).as_ref() {
            let _ = events.send(event);
        }
    }

    fn finish_events(&self, last: Option<ConnectionEvent>) {
        let mut events = lock(&self.events);
        if let (Some(sender), Some(event)) = (events.as_ref(), last) {
            let _ = sender.send(event);
        }
        events.take();
    }

    /// Encode and write one frame under the send lock.
    ///
    /// A transport failure moves the connection to `Error`.
    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.state().is_finished() {
            return Err(PeerError::NotOpen);
        }
        let written = {
            let mut writer = lock(&self.writer);
            writer.set_max_frame_size(self.max_frame_size());
            writer.write_frame(frame)
        };
        match written {
            Ok(()) => {
                debug!(
                    conn = %self.id,
                    kind = ?frame.kind,
                    session = frame.session_id,
                    message = frame.message_id,
                    "sent frame"
                );
                Ok(())
            }
            Err(err @ FrameError::FrameTooLarge { .. }) => Err(err.into()),
            Err(err) => {
                self.fail(format!("write failed: {err}"));
                Err(err.into())
            }
        }
    }

    fn start(&self) -> Result<()> {
        let descriptor =
            ConnectionDescriptor::new(self.config.protocol_version, self.max_frame_size())
                .with_data(self.config.data.clone());
        self.advance(ConnectionState::StartSent);
        self.send_frame(&Frame::connection(
            FrameType::ConnectionStart,
            descriptor.to_bytes()?,
        ))
    }

    pub(crate) fn close(&self) -> Result<()> {
        let state = self.state();
        if state.is_finished() {
            return Ok(());
        }
        let sent = self.send_frame(&Frame::connection(FrameType::ConnectionClose, Bytes::new()));
        if self.advance(ConnectionState::End) {
            info!(conn = %self.id, "connection closed");
            self.teardown();
            self.finish_events(None);
        }
        sent
    }

    /// Move to `Error`, tear down and raise a single error event.
    fn fail(&self, reason: String) {
        {
            let mut state = lock(&self.state);
            if state.is_finished() {
                return;
            }
            *state = ConnectionState::Error;
            self.state_changed.notify_all();
        }
        warn!(conn = %self.id, reason = %reason, "connection failed");
        lock(&self.failure).get_or_insert_with(|| reason.clone());
        self.teardown();
        self.finish_events(Some(ConnectionEvent::Error(reason)));
    }

    /// Notify every pending and active session, then release the transport.
    fn teardown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let sessions: Vec<Session> = {
            let mut table = lock(&self.sessions);
            let pending = std::mem::take(&mut table.pending);
            let active = std::mem::take(&mut table.active);
            pending.into_values().chain(active.into_values()).collect()
        };
        lock(&self.session_ids).reset();
        for session in sessions {
            session.close_local();
        }
        if let Err(err) = self.stream.shutdown() {
            debug!(conn = %self.id, error = %err, "transport shutdown failed");
        }
    }

    fn process_frame(&self, frame: Frame) {
        let state = self.state();
        if state.is_finished() {
            return;
        }
        debug!(
            conn = %self.id,
            kind = ?frame.kind,
            session = frame.session_id,
            message = frame.message_id,
            "received frame"
        );
        let kind = frame.kind;
        match kind {
            FrameType::ConnectionStart if state == ConnectionState::Start => {
                self.on_connection_start(&frame.payload)
            }
            FrameType::ConnectionAccept if state == ConnectionState::StartSent => {
                self.on_connection_accept(&frame.payload)
            }
            FrameType::ConnectionReject if state == ConnectionState::StartSent => {
                self.on_connection_reject(&frame.payload)
            }
            FrameType::ConnectionOpen
                if matches!(state, ConnectionState::AcceptSent | ConnectionState::OpenSent) =>
            {
                self.advance(ConnectionState::Open);
            }
            FrameType::ConnectionClose => {
                if self.advance(ConnectionState::End) {
                    info!(conn = %self.id, "connection closed by remote");
                    self.teardown();
                    self.finish_events(Some(ConnectionEvent::Closed));
                }
            }
            _ if kind.has_extension() => {
                if state != ConnectionState::Open {
                    debug!(conn = %self.id, kind = ?kind, "ignoring frame before open");
                    return;
                }
                self.process_session_frame(frame);
            }
            _ => debug!(conn = %self.id, kind = ?kind, state = ?state, "ignoring frame"),
        }
    }

    fn on_connection_start(&self, payload: &[u8]) {
        let descriptor = match ConnectionDescriptor::from_bytes(payload) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(conn = %self.id, error = %err, "malformed connection descriptor");
                self.reject_connection("Invalid connection descriptor");
                return;
            }
        };
        *lock(&self.peer_data) = descriptor.data.clone();

        if !self
            .config
            .protocol_version
            .is_compatible(&descriptor.protocol_version)
        {
            warn!(
                conn = %self.id,
                local = %self.config.protocol_version,
                remote = %descriptor.protocol_version,
                "protocol version mismatch"
            );
            self.reject_connection(VERSION_INCOMPATIBLE);
            return;
        }

        self.adopt_max_frame_size(descriptor.max_frame_size());
        let accept = ConnectionDescriptor::new(self.config.protocol_version, self.max_frame_size());
        self.advance(ConnectionState::AcceptSent);
        match accept.to_bytes() {
            Ok(payload) => {
                let _ = self.send_frame(&Frame::connection(FrameType::ConnectionAccept, payload));
            }
            Err(err) => self.fail(format!("encode accept descriptor: {err}")),
        }
    }

    fn reject_connection(&self, reason: &str) {
        let descriptor = ConnectionDescriptor::new(self.config.protocol_version, self.max_frame_size())
            .with_error(reason);
        if let Ok(payload) = descriptor.to_bytes() {
            let _ = self.send_frame(&Frame::connection(FrameType::ConnectionReject, payload));
        }
        lock(&self.failure).get_or_insert_with(|| reason.to_string());
        if self.advance(ConnectionState::End) {
            self.teardown();
            self.finish_events(None);
        }
    }

    fn on_connection_accept(&self, payload: &[u8]) {
        match ConnectionDescriptor::from_bytes(payload) {
            Ok(descriptor) => self.adopt_max_frame_size(descriptor.max_frame_size()),
            Err(err) => debug!(conn = %self.id, error = %err, "accept without descriptor"),
        }
        // ConnectionOpen goes out before Open is observable, so no session
        // frame can overtake it.
        if self
            .send_frame(&Frame::connection(FrameType::ConnectionOpen, Bytes::new()))
            .is_ok()
        {
            self.advance(ConnectionState::Open);
        }
    }

    fn on_connection_reject(&self, payload: &[u8]) {
        let reason = ConnectionDescriptor::from_bytes(payload)
            .ok()
            .and_then(|descriptor| descriptor.error)
            .unwrap_or_else(|| "rejected by remote".to_string());
        warn!(conn = %self.id, reason = %reason, "connection rejected");
        lock(&self.failure).get_or_insert(reason);
        if self.advance(ConnectionState::End) {
            self.teardown();
            self.finish_events(None);
        }
    }

    fn process_session_frame(&self, frame: Frame) {
        let id = frame.session_id;
        match frame.kind {
            FrameType::SessionStart => self.on_session_start(id, &frame.payload),
            FrameType::SessionAccept => {
                let accepted = {
                    let mut table = lock(&self.sessions);
                    match table.pending.get(&id) {
                        Some(session) if session.direction() == Direction::Outbound => {
                            let session = session.clone();
                            table.pending.remove(&id);
                            table.active.insert(id, session.clone());
                            Some(session)
                        }
                        _ => None,
                    }
                };
                if let Some(session) = accepted {
                    session.set_accept_data(frame.payload);
                    let _ = self.send_frame(&Frame::session(FrameType::SessionOpen, id, Bytes::new()));
                }
            }
            FrameType::SessionReject => {
                let rejected = {
                    let mut table = lock(&self.sessions);
                    match table.pending.get(&id) {
                        Some(session) if session.direction() == Direction::Outbound => {
                            table.pending.remove(&id)
                        }
                        _ => None,
                    }
                };
                if let Some(session) = rejected {
                    debug!(conn = %self.id, session = id, "session rejected by remote");
                    session.notify_rejected(frame.payload);
                }
            }
            FrameType::SessionOpen => self.on_session_open(id),
            FrameType::SessionClose => {
                let closed = {
                    let mut table = lock(&self.sessions);
                    table.active.remove(&id).or_else(|| table.pending.remove(&id))
                };
                if let Some(session) = closed {
                    lock(&self.session_ids).remove(id);
                    debug!(conn = %self.id, session = id, "session closed by remote");
                    session.close_local();
                }
            }
            FrameType::MessageSend | FrameType::MessageAccept | FrameType::MessageReject => {
                let session = lock(&self.sessions).active.get(&id).cloned();
                match session {
                    Some(session) => session.process_message_frame(frame),
                    None => debug!(conn = %self.id, session = id, "message for unknown session"),
                }
            }
            _ => {}
        }
    }

    fn on_session_start(&self, id: u32, payload: &[u8]) {
        let descriptor = match SessionDescriptor::from_bytes(payload) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(conn = %self.id, session = id, error = %err, "malformed session descriptor");
                return;
            }
        };
        let offered = {
            let mut table = lock(&self.sessions);
            if table.pending.contains_key(&id) || table.active.contains_key(&id) {
                debug!(conn = %self.id, session = id, "duplicate session start ignored");
                return;
            }
            let session = Session::new(self, id, descriptor, Direction::Inbound);
            table.pending.insert(id, session.clone());
            session
        };
        debug!(conn = %self.id, session = id, name = %offered.name(), "session offered");
        self.emit(ConnectionEvent::SessionOffered(offered));
    }

    fn on_session_open(&self, id: u32) {
        enum Next {
            EchoAndOpen(Session),
            Open(Session),
            Ignore,
        }
        let next = {
            let mut table = lock(&self.sessions);
            if let Some(session) = table.pending.get(&id).cloned() {
                if session.direction() == Direction::Inbound && session.is_accepted() {
                    table.pending.remove(&id);
                    table.active.insert(id, session.clone());
                    Next::EchoAndOpen(session)
                } else {
                    Next::Ignore
                }
            } else if let Some(session) = table.active.get(&id) {
                Next::Open(session.clone())
            } else {
                Next::Ignore
            }
        };
        match next {
            Next::EchoAndOpen(session) => {
                if self
                    .send_frame(&Frame::session(FrameType::SessionOpen, id, Bytes::new()))
                    .is_ok()
                {
                    session.notify_open();
                }
            }
            Next::Open(session) => session.notify_open(),
            Next::Ignore => debug!(conn = %self.id, session = id, "unexpected session open"),
        }
    }

    fn create_session(&self, name: &str, data: Option<&[u8]>) -> Result<Session> {
        if self.state() != ConnectionState::Open {
            return Err(PeerError::NotOpen);
        }
        let descriptor = SessionDescriptor::new(name, data);
        let payload = descriptor.to_bytes()?;
        let session = {
            let id = lock(&self.session_ids).next()?;
            let session = Session::new(self, id, descriptor, Direction::Outbound);
            lock(&self.sessions).pending.insert(id, session.clone());
            session
        };
        let id = session.id();
        let timeout = self.config.session_timeout;

        let mut offered = false;
        let settled = self
            .send_frame(&Frame::session(FrameType::SessionStart, id, payload))
            .and_then(|()| {
                offered = true;
                match session.wait_outcome(timeout) {
                    Some(Outcome::Open) => Ok(()),
                    Some(Outcome::Rejected(data)) => Err(PeerError::SessionRejected {
                        session_id: id,
                        data,
                    }),
                    Some(Outcome::Closed) => Err(PeerError::Disconnected(
                        "connection closed while opening session".to_string(),
                    )),
                    None => Err(PeerError::SessionTimeout(timeout)),
                }
            });

        match settled {
            Ok(()) => {
                debug!(conn = %self.id, session = id, name = %name, "session open");
                Ok(session)
            }
            Err(err) => {
                {
                    let mut table = lock(&self.sessions);
                    table.pending.remove(&id);
                    table.active.remove(&id);
                }
                session.close_local();
                // The remote side may still hold the offer; withdraw it before
                // the id can be handed out again.
                if offered && !matches!(err, PeerError::SessionRejected { .. }) {
                    let _ = self.send_frame(&Frame::session(FrameType::SessionClose, id, Bytes::new()));
                }
                lock(&self.session_ids).remove(id);
                Err(err)
            }
        }
    }

    /// Inbound session accepted locally: tell the remote side.
    pub(crate) fn accept_session(&self, id: u32, data: &[u8]) -> Result<()> {
        if !lock(&self.sessions).pending.contains_key(&id) {
            return Err(PeerError::SessionNotOpen(id));
        }
        self.send_frame(&Frame::session(
            FrameType::SessionAccept,
            id,
            Bytes::copy_from_slice(data),
        ))
    }

    /// Inbound session rejected locally.
    pub(crate) fn reject_session(&self, id: u32, data: &[u8]) -> Result<()> {
        if lock(&self.sessions).pending.remove(&id).is_none() {
            return Err(PeerError::SessionNotOpen(id));
        }
        self.send_frame(&Frame::session(
            FrameType::SessionReject,
            id,
            Bytes::copy_from_slice(data),
        ))
    }

    /// Session closed locally: forget it and tell the remote side.
    pub(crate) fn close_session(&self, id: u32) -> Result<()> {
        let removed = {
            let mut table = lock(&self.sessions);
            table.pending.remove(&id);
            table.active.remove(&id).is_some()
        };
        lock(&self.session_ids).remove(id);
        if removed {
            self.send_frame(&Frame::session(FrameType::SessionClose, id, Bytes::new()))
        } else {
            Ok(())
        }
    }
}
