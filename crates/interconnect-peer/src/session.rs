use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use interconnect_frame::{Frame, FrameType};
use tracing::debug;

use crate::allocator::IdAllocator;
use crate::connection::ConnectionInner;
use crate::descriptor::SessionDescriptor;
use crate::error::{PeerError, Result};
use crate::message::{Message, Response};
use crate::settle::{lock, Settlement};

/// Who opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Created locally with `create_session`.
    Outbound,
    /// Offered by the remote endpoint.
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Open,
    End,
}

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Open,
    Rejected(Bytes),
    Closed,
}

struct MessageTable {
    ids: IdAllocator,
    pending: HashMap<u32, Arc<Settlement<Response>>>,
}

pub(crate) struct SessionInner {
    id: u32,
    descriptor: SessionDescriptor,
    direction: Direction,
    connection: Weak<ConnectionInner>,
    connection_id: String,
    message_timeout: Duration,
    state: Mutex<SessionState>,
    accepted: AtomicBool,
    outcome: Settlement<Outcome>,
    accept_data: Mutex<Option<Bytes>>,
    messages: Mutex<MessageTable>,
    inbox: Mutex<Option<Sender<Message>>>,
    received: Mutex<Receiver<Message>>,
}

/// A named logical channel multiplexed over a connection.
///
/// Handles are cheap to clone and all refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        connection: &ConnectionInner,
        id: u32,
        descriptor: SessionDescriptor,
        direction: Direction,
    ) -> Self {
        let (inbox, received) = mpsc::channel();
        Self {
            inner: Arc::new(SessionInner {
                id,
                descriptor,
                direction,
                connection: connection.downgrade(),
                connection_id: connection.id().to_string(),
                message_timeout: connection.config().message_timeout,
                state: Mutex::new(SessionState::Start),
                accepted: AtomicBool::new(false),
                outcome: Settlement::new(),
                accept_data: Mutex::new(None),
                messages: Mutex::new(MessageTable {
                    ids: IdAllocator::interleaved(connection.role().id_start()),
                    pending: HashMap::new(),
                }),
                inbox: Mutex::new(Some(inbox)),
                received: Mutex::new(received),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// Data supplied by the side that opened the session.
    pub fn data(&self) -> Option<&[u8]> {
        self.inner.descriptor.data.as_deref()
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Payload the remote endpoint attached to its `SessionAccept`.
    pub fn accept_data(&self) -> Option<Bytes> {
        lock(&self.inner.accept_data).clone()
    }

    /// Accept an offered session. Returns once `SessionAccept` is sent; use
    /// [`wait_open`](Self::wait_open) to block until the handshake completes.
    pub fn accept(&self, data: &[u8]) -> Result<()> {
        self.require_inbound("accept")?;
        if self.state() != SessionState::Start {
            return Err(PeerError::SessionNotOpen(self.inner.id));
        }
        let connection = self.inner.connection()?;
        // Must be visible before the remote SessionOpen can arrive.
        if self.inner.accepted.swap(true, Ordering::SeqCst) {
            return Err(PeerError::InvalidArgument(format!(
                "session {} already accepted",
                self.inner.id
            )));
        }
        connection.accept_session(self.inner.id, data).inspect_err(|_| {
            self.inner.accepted.store(false, Ordering::SeqCst);
        })
    }

    /// Reject an offered session, sending `data` back to the initiator.
    pub fn reject(&self, data: &[u8]) -> Result<()> {
        self.require_inbound("reject")?;
        if self.inner.accepted.load(Ordering::SeqCst) {
            return Err(PeerError::InvalidArgument(format!(
                "session {} already accepted",
                self.inner.id
            )));
        }
        let connection = self.inner.connection()?;
        let sent = connection.reject_session(self.inner.id, data);
        self.inner
            .finish(Outcome::Rejected(Bytes::copy_from_slice(data)));
        sent
    }

    /// Block until the session handshake settles.
    pub fn wait_open(&self, timeout: Duration) -> Result<()> {
        match self.inner.outcome.wait(timeout) {
            Some(Outcome::Open) => Ok(()),
            Some(Outcome::Rejected(data)) => Err(PeerError::SessionRejected {
                session_id: self.inner.id,
                data,
            }),
            Some(Outcome::Closed) => Err(PeerError::SessionNotOpen(self.inner.id)),
            None => Err(PeerError::SessionTimeout(timeout)),
        }
    }

    /// Send a message and block until the remote endpoint accepts or rejects
    /// it, or the message timeout elapses.
    pub fn send(&self, payload: &[u8]) -> Result<Response> {
        if self.state() != SessionState::Open {
            return Err(PeerError::SessionNotOpen(self.inner.id));
        }
        let connection = self.inner.connection()?;
        let (message_id, slot) = {
            let mut table = lock(&self.inner.messages);
            let message_id = table.ids.next()?;
            let slot = Arc::new(Settlement::new());
            table.pending.insert(message_id, Arc::clone(&slot));
            (message_id, slot)
        };

        let timeout = self.inner.message_timeout;
        let result = connection
            .send_frame(&Frame::message(
                FrameType::MessageSend,
                self.inner.id,
                message_id,
                Bytes::copy_from_slice(payload),
            ))
            .and_then(|()| slot.wait(timeout).ok_or(PeerError::MessageTimeout(timeout)));

        let mut table = lock(&self.inner.messages);
        table.pending.remove(&message_id);
        table.ids.remove(message_id);
        result
    }

    /// Close the session and notify the remote endpoint. Closing twice does
    /// nothing.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if *state == SessionState::End {
                return Ok(());
            }
            *state = SessionState::End;
        }
        self.inner.finish(Outcome::Closed);
        debug!(conn = %self.inner.connection_id, session = self.inner.id, "session closed");
        match self.inner.connection.upgrade() {
            Some(connection) => connection.close_session(self.inner.id),
            None => Ok(()),
        }
    }

    /// Block until the remote endpoint sends a message. Fails once the
    /// session ended and every queued message was delivered.
    pub fn recv(&self) -> Result<Message> {
        lock(&self.inner.received)
            .recv()
            .map_err(|_| PeerError::SessionNotOpen(self.inner.id))
    }

    /// Like [`recv`](Self::recv), returning `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        match lock(&self.inner.received).recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PeerError::SessionNotOpen(self.inner.id)),
        }
    }

    /// Messages sent by this side still awaiting a response.
    pub fn pending_messages(&self) -> usize {
        lock(&self.inner.messages).pending.len()
    }

    fn require_inbound(&self, action: &str) -> Result<()> {
        if self.inner.direction == Direction::Inbound {
            Ok(())
        } else {
            Err(PeerError::InvalidArgument(format!(
                "cannot {action} locally created session {}",
                self.inner.id
            )))
        }
    }

    pub(crate) fn is_accepted(&self) -> bool {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_outcome(&self, timeout: Duration) -> Option<Outcome> {
        self.inner.outcome.wait(timeout)
    }

    pub(crate) fn set_accept_data(&self, data: Bytes) {
        if !data.is_empty() {
            *lock(&self.inner.accept_data) = Some(data);
        }
    }

    pub(crate) fn notify_open(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state != SessionState::Start {
                return;
            }
            *state = SessionState::Open;
        }
        self.inner.outcome.settle(Outcome::Open);
    }

    pub(crate) fn notify_rejected(&self, data: Bytes) {
        self.inner.finish(Outcome::Rejected(data));
    }

    /// End the session without sending anything: the remote side closed it
    /// or the connection went away. Blocked `send` calls are not woken and
    /// end in `MessageTimeout`.
    pub(crate) fn close_local(&self) {
        self.inner.finish(Outcome::Closed);
    }

    pub(crate) fn process_message_frame(&self, frame: Frame) {
        if self.state() != SessionState::Open {
            debug!(
                conn = %self.inner.connection_id,
                session = self.inner.id,
                "ignoring message for session that is not open"
            );
            return;
        }
        match frame.kind {
            FrameType::MessageSend => {
                let message = Message::new(
                    Arc::downgrade(&self.inner),
                    self.inner.id,
                    frame.message_id,
                    frame.payload,
                );
                if let Some(inbox) = lock(&self.inner.inbox).as_ref() {
                    let _ = inbox.send(message);
                }
            }
            FrameType::MessageAccept | FrameType::MessageReject => {
                let slot = lock(&self.inner.messages)
                    .pending
                    .get(&frame.message_id)
                    .cloned();
                match slot {
                    Some(slot) => {
                        slot.settle(Response {
                            accepted: frame.kind == FrameType::MessageAccept,
                            data: frame.payload,
                        });
                    }
                    None => debug!(
                        conn = %self.inner.connection_id,
                        session = self.inner.id,
                        message = frame.message_id,
                        "response for unknown message"
                    ),
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("name", &self.inner.descriptor.name)
            .field("direction", &self.inner.direction)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn connection(&self) -> Result<Arc<ConnectionInner>> {
        self.connection
            .upgrade()
            .ok_or_else(|| PeerError::Disconnected(format!("{} dropped", self.connection_id)))
    }

    /// Move to `End`, drop pending messages and stop delivering new ones.
    fn finish(&self, outcome: Outcome) {
        *lock(&self.state) = SessionState::End;
        {
            let mut table = lock(&self.messages);
            table.pending.clear();
            table.ids.reset();
        }
        lock(&self.inbox).take();
        self.outcome.settle(outcome);
    }

    /// Answer an inbound message.
    pub(crate) fn respond(&self, kind: FrameType, message_id: u32, data: &[u8]) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(PeerError::SessionNotOpen(self.id));
        }
        self.connection()?.send_frame(&Frame::message(
            kind,
            self.id,
            message_id,
            Bytes::copy_from_slice(data),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::{Connection, ConnectionEvent};
    use crate::testing::{next_offer, open_pair};

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + WAIT;
        while !condition() {
            assert!(std::time::Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Open one session from `client`, accepting it on `server` with `data`.
    fn open_session(client: &Connection, server: &Connection, data: &'static [u8]) -> (Session, Session) {
        thread::scope(|scope| {
            let acceptor = scope.spawn(|| {
                let offered = next_offer(server);
                offered.accept(data).expect("accept");
                offered.wait_open(WAIT).expect("acceptor side open");
                offered
            });
            let session = client.create_session("work", Some(b"hello")).expect("session");
            (session, acceptor.join().expect("acceptor thread"))
        })
    }

    #[test]
    fn accepted_session_opens_on_both_sides() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        let (outbound, inbound) = open_session(&client, &server, b"welcome");

        assert_eq!(outbound.state(), SessionState::Open);
        assert_eq!(inbound.state(), SessionState::Open);
        assert_eq!(outbound.direction(), Direction::Outbound);
        assert_eq!(inbound.direction(), Direction::Inbound);
        assert_eq!(inbound.name(), "work");
        assert_eq!(inbound.data(), Some(&b"hello"[..]));
        assert_eq!(outbound.accept_data().as_deref(), Some(&b"welcome"[..]));
        assert_eq!(outbound.id(), inbound.id());
        assert_eq!(client.active_sessions(), 1);
        assert_eq!(server.active_sessions(), 1);
    }

    #[test]
    fn rejected_session_reports_payload() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        thread::scope(|scope| {
            scope.spawn(|| {
                let offered = next_offer(&server);
                offered.reject(b"busy").expect("reject");
                assert_eq!(offered.state(), SessionState::End);
            });
            match client.create_session("work", None) {
                Err(PeerError::SessionRejected { data, .. }) => assert_eq!(&data[..], b"busy"),
                other => panic!("expected rejection, got {other:?}"),
            }
        });
        assert_eq!(client.pending_sessions(), 0);
        assert_eq!(server.pending_sessions(), 0);
    }

    #[test]
    fn unanswered_session_times_out_and_releases_id() {
        let (client, server) = open_pair(
            ConnectionConfig::default().with_session_timeout(Duration::from_millis(100)),
            ConnectionConfig::default(),
        );
        let err = client.create_session("ignored", None).expect_err("no answer");
        assert!(matches!(err, PeerError::SessionTimeout(_)));
        assert_eq!(client.pending_sessions(), 0);

        // The offer still reached the acceptor.
        assert!(matches!(
            server.recv_event_timeout(WAIT),
            Ok(Some(ConnectionEvent::SessionOffered(_)))
        ));
    }

    #[test]
    fn timed_out_offer_is_withdrawn_and_id_reused() {
        let (client, server) = open_pair(
            ConnectionConfig::default().with_session_timeout(Duration::from_millis(300)),
            ConnectionConfig::default(),
        );
        assert!(matches!(
            client.create_session("first", None),
            Err(PeerError::SessionTimeout(_))
        ));

        let stale = next_offer(&server);
        assert_eq!(stale.id(), 0);
        wait_until(|| server.pending_sessions() == 0 && stale.state() == SessionState::End);
        assert!(matches!(stale.accept(b""), Err(PeerError::SessionNotOpen(0))));

        let (session, offered) = thread::scope(|scope| {
            let acceptor = scope.spawn(|| {
                let offered = next_offer(&server);
                offered.accept(b"").expect("accept");
                offered.wait_open(WAIT).expect("acceptor side open");
                offered
            });
            let session = client.create_session("second", None).expect("second session");
            (session, acceptor.join().expect("acceptor thread"))
        });
        assert_eq!(session.id(), 0);
        assert_eq!(offered.id(), 0);
        assert_eq!(offered.name(), "second");
        assert_eq!(server.active_sessions(), 1);
    }

    #[test]
    fn close_discards_pending_messages() {
        let (client, server) = open_pair(
            ConnectionConfig::default().with_message_timeout(Duration::from_millis(300)),
            ConnectionConfig::default(),
        );
        let (outbound, _inbound) = open_session(&client, &server, b"");

        thread::scope(|scope| {
            let sender = scope.spawn(|| outbound.send(b"held"));
            wait_until(|| outbound.pending_messages() == 1);
            outbound.close().expect("close");
            assert_eq!(outbound.pending_messages(), 0);
            assert!(matches!(
                sender.join().expect("sender thread"),
                Err(PeerError::MessageTimeout(_))
            ));
        });
    }

    #[test]
    fn connection_teardown_discards_pending_messages() {
        let (client, server) = open_pair(
            ConnectionConfig::default().with_message_timeout(Duration::from_millis(300)),
            ConnectionConfig::default(),
        );
        let (outbound, _inbound) = open_session(&client, &server, b"");

        thread::scope(|scope| {
            let sender = scope.spawn(|| outbound.send(b"held"));
            wait_until(|| outbound.pending_messages() == 1);
            client.close().expect("close");
            assert_eq!(outbound.pending_messages(), 0);
            assert!(matches!(
                sender.join().expect("sender thread"),
                Err(PeerError::MessageTimeout(_))
            ));
        });
    }

    #[test]
    fn messages_accept_and_reject() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        let (outbound, inbound) = open_session(&client, &server, b"");

        thread::scope(|scope| {
            scope.spawn(|| {
                let first = inbound.recv_timeout(WAIT).expect("recv").expect("message");
                assert_eq!(first.payload().as_ref(), b"ping");
                assert_eq!(first.session_id(), inbound.id());
                first.accept(b"pong").expect("accept message");

                let second = inbound.recv_timeout(WAIT).expect("recv").expect("message");
                second.reject(b"nope").expect("reject message");
            });

            let accepted = outbound.send(b"ping").expect("send");
            assert!(accepted.accepted);
            assert_eq!(accepted.data.as_ref(), b"pong");

            let rejected = outbound.send(b"again").expect("send");
            assert!(!rejected.accepted);
            assert_eq!(rejected.data.as_ref(), b"nope");
        });
        assert_eq!(outbound.pending_messages(), 0);
    }

    #[test]
    fn message_ids_follow_connection_role() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        let (outbound, inbound) = open_session(&client, &server, b"");

        thread::scope(|scope| {
            scope.spawn(|| {
                let from_client = inbound.recv_timeout(WAIT).expect("recv").expect("message");
                assert_eq!(from_client.id() % 2, 0);
                from_client.accept(b"").expect("accept");
            });
            outbound.send(b"x").expect("send from initiator");
        });
        thread::scope(|scope| {
            scope.spawn(|| {
                let from_server = outbound.recv_timeout(WAIT).expect("recv").expect("message");
                assert_eq!(from_server.id() % 2, 1);
                from_server.accept(b"").expect("accept");
            });
            inbound.send(b"y").expect("send from acceptor");
        });
    }

    #[test]
    fn unanswered_message_times_out() {
        let (client, server) = open_pair(
            ConnectionConfig::default().with_message_timeout(Duration::from_millis(100)),
            ConnectionConfig::default(),
        );
        let (outbound, _inbound) = open_session(&client, &server, b"");
        assert!(matches!(
            outbound.send(b"into the void"),
            Err(PeerError::MessageTimeout(_))
        ));
        assert_eq!(outbound.pending_messages(), 0);
    }

    #[test]
    fn close_ends_remote_session() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        let (outbound, inbound) = open_session(&client, &server, b"");

        outbound.close().expect("close");
        outbound.close().expect("second close is a no-op");
        assert_eq!(outbound.state(), SessionState::End);
        assert!(matches!(outbound.send(b"late"), Err(PeerError::SessionNotOpen(_))));

        // The remote side learns about it through its inbox closing.
        assert!(inbound.recv_timeout(WAIT).is_err());
        assert_eq!(inbound.state(), SessionState::End);
        assert_eq!(server.active_sessions(), 0);
    }

    #[test]
    fn connection_close_ends_sessions() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        let (outbound, inbound) = open_session(&client, &server, b"");

        client.close().expect("close");
        assert_eq!(outbound.state(), SessionState::End);
        assert!(inbound.recv_timeout(WAIT).is_err());
        assert_eq!(inbound.state(), SessionState::End);
    }

    #[test]
    fn outbound_session_cannot_be_accepted_locally() {
        let (client, server) = open_pair(ConnectionConfig::default(), ConnectionConfig::default());
        let (outbound, inbound) = open_session(&client, &server, b"");
        assert!(matches!(outbound.accept(b""), Err(PeerError::InvalidArgument(_))));
        assert!(matches!(inbound.reject(b""), Err(PeerError::InvalidArgument(_))));
    }
}
