//! Per-socket session state machine.
//!
//! A [`Session`] owns exactly one socket together with its lifecycle state,
//! in/out buffers, sticky failure flags, and the event sink all of its
//! notifications go to. The dispatcher drives sessions from readiness
//! events; the control surface reaches them only through the session table
//! while holding its lock.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting        -> Connected   (pending connect resolved, emit Connected)
//! Connecting        -> failed      (connect error, emit Error)
//! ListeningRtsp     -> (unchanged; accepted child born Connected)
//! ListeningTcpDgrams-> (unchanged; accepted child born Connected)
//! Connected/Datagram-> failed      (terminal I/O error, emit Error)
//! ```
//!
//! Failure is sticky and one-shot: the first terminal receive or send error
//! posts a single `Error` event and permanently removes that direction from
//! the session's readiness interest. The session stays in the table until
//! its owner destroys it; the socket is closed exactly once, on drop.

pub(crate) mod framing;
pub(crate) mod rtp;

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};

use crate::clock;
use crate::error::{NetError, Result};
use crate::event::{EventSink, SessionEvent};
use crate::protocol::RtspParser;
use self::framing::RtspFrame;

/// Session identifier: dense positive integer, allocated from 1 and unique
/// for the lifetime of one [`NetworkSession`](crate::NetworkSession).
pub type SessionId = usize;

/// Largest UDP payload the core expects (standard Ethernet MTU).
const MAX_UDP_PAYLOAD: usize = 1500;

/// Stream reads are sliced into chunks of this size.
const STREAM_READ_CHUNK: usize = 512;

/// Lifecycle state of a session's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Non-blocking TCP connect in flight.
    Connecting,
    /// Connected TCP stream carrying RTSP text or length-prefixed datagrams.
    Connected,
    /// TCP listener whose children speak RTSP.
    ListeningRtsp,
    /// TCP listener whose children carry length-prefixed datagrams.
    ListeningTcpDgrams,
    /// Bound (and usually connected) UDP socket.
    Datagram,
}

/// The socket variants a session can own.
pub(crate) enum SessionSocket {
    Stream(TcpStream),
    Listener(TcpListener),
    Datagram(UdpSocket),
}

impl mio::event::Source for SessionSocket {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            SessionSocket::Stream(s) => s.register(registry, token, interests),
            SessionSocket::Listener(s) => s.register(registry, token, interests),
            SessionSocket::Datagram(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        match self {
            SessionSocket::Stream(s) => s.reregister(registry, token, interests),
            SessionSocket::Listener(s) => s.reregister(registry, token, interests),
            SessionSocket::Datagram(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            SessionSocket::Stream(s) => s.deregister(registry),
            SessionSocket::Listener(s) => s.deregister(registry),
            SessionSocket::Datagram(s) => s.deregister(registry),
        }
    }
}

/// One socket plus its state, buffers, and event sink.
pub(crate) struct Session {
    id: SessionId,
    state: SessionState,
    /// Framing of the connected stream: RTSP text with interleaved binary
    /// when true, 16-bit length-prefixed datagrams when false. Inherited by
    /// accepted children from their listener.
    rtsp_framing: bool,
    socket: SessionSocket,
    inbound: BytesMut,
    out_stream: BytesMut,
    out_datagrams: VecDeque<Vec<u8>>,
    saw_recv_failure: bool,
    saw_send_failure: bool,
    sink: Arc<dyn EventSink>,
    parser: Option<Arc<dyn RtspParser>>,
    /// Interest currently registered with the poll registry, if any.
    registered: Option<Interest>,
}

impl Session {
    /// Build a session around an already-configured non-blocking socket.
    ///
    /// A session born in `Connected` state (an accepted child) immediately
    /// posts `ClientConnected` with both endpoint addresses; every other
    /// initial state is silent at construction.
    pub(crate) fn new(
        id: SessionId,
        state: SessionState,
        socket: SessionSocket,
        rtsp_framing: bool,
        parser: Option<Arc<dyn RtspParser>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let session = Session {
            id,
            state,
            rtsp_framing,
            socket,
            inbound: BytesMut::new(),
            out_stream: BytesMut::new(),
            out_datagrams: VecDeque::new(),
            saw_recv_failure: false,
            saw_send_failure: false,
            sink,
            parser,
            registered: None,
        };

        if session.state == SessionState::Connected {
            session.post_client_connected();
        }

        session
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn is_listener(&self) -> bool {
        matches!(
            self.state,
            SessionState::ListeningRtsp | SessionState::ListeningTcpDgrams
        )
    }

    /// Framing inherited by children accepted from this listener.
    pub(crate) fn child_rtsp_framing(&self) -> bool {
        self.state == SessionState::ListeningRtsp
    }

    pub(crate) fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    pub(crate) fn parser(&self) -> Option<Arc<dyn RtspParser>> {
        self.parser.clone()
    }

    /// Accept one pending connection, or `None` on `WouldBlock`.
    pub(crate) fn try_accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let listener = match &self.socket {
            SessionSocket::Listener(listener) => listener,
            _ => return Ok(None),
        };
        loop {
            match listener.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether the dispatcher should watch this socket for readability.
    pub(crate) fn wants_to_read(&self) -> bool {
        !self.saw_recv_failure && self.state != SessionState::Connecting
    }

    /// Whether the dispatcher should watch this socket for writability.
    pub(crate) fn wants_to_write(&self) -> bool {
        !self.saw_send_failure
            && (self.state == SessionState::Connecting
                || (self.state == SessionState::Connected && !self.out_stream.is_empty())
                || (self.state == SessionState::Datagram && !self.out_datagrams.is_empty()))
    }

    fn desired_interest(&self) -> Option<Interest> {
        match (self.wants_to_read(), self.wants_to_write()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Bring the poll registration in line with the session's current
    /// read/write interest. Must be called after any operation that can
    /// change [`wants_to_read`](Self::wants_to_read) or
    /// [`wants_to_write`](Self::wants_to_write).
    pub(crate) fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let desired = self.desired_interest();
        if desired == self.registered {
            return Ok(());
        }

        match (self.registered, desired) {
            (None, Some(interest)) => registry.register(&mut self.socket, Token(self.id), interest)?,
            (Some(_), Some(interest)) => {
                registry.reregister(&mut self.socket, Token(self.id), interest)?
            }
            (Some(_), None) => registry.deregister(&mut self.socket)?,
            (None, None) => {}
        }

        self.registered = desired;
        Ok(())
    }

    /// Remove the socket from the poll registry ahead of destruction.
    pub(crate) fn deregister(&mut self, registry: &Registry) {
        if self.registered.take().is_some() {
            if let Err(e) = registry.deregister(&mut self.socket) {
                tracing::debug!(session_id = self.id, error = %e, "deregister failed");
            }
        }
    }

    /// One round of reads for a readable socket.
    pub(crate) fn read_more(&mut self) {
        match self.state {
            SessionState::Datagram => self.read_datagrams(),
            SessionState::Connected => self.read_stream(),
            // Listeners are handled by accept; Connecting sockets are never
            // in the read set.
            _ => {}
        }
    }

    /// One round of writes for a writable socket.
    pub(crate) fn write_more(&mut self) {
        match self.state {
            SessionState::Connecting => self.finish_connect(),
            SessionState::Datagram => self.write_datagrams(),
            SessionState::Connected => self.write_stream(),
            _ => {}
        }
    }

    /// Queue outbound data according to the session's transport mode.
    ///
    /// - `Datagram`: the payload becomes one whole datagram.
    /// - `Connected`, length-prefixed framing: a big-endian 16-bit length
    ///   prefix is prepended; payloads above 65535 bytes are rejected.
    /// - `Connected`, RTSP framing: appended verbatim.
    pub(crate) fn send_request(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Datagram => {
                self.out_datagrams.push_back(data.to_vec());
                Ok(())
            }
            SessionState::Connected => {
                if !self.rtsp_framing {
                    if data.len() > u16::MAX as usize {
                        return Err(NetError::PayloadTooLarge(data.len()));
                    }
                    self.out_stream
                        .extend_from_slice(&(data.len() as u16).to_be_bytes());
                }
                self.out_stream.extend_from_slice(data);
                Ok(())
            }
            _ => Err(NetError::InvalidState(
                "send_request requires a connected or datagram session",
            )),
        }
    }

    /// Re-pin a UDP session's remote peer.
    pub(crate) fn connect_peer(&mut self, remote: SocketAddrV4) -> Result<()> {
        match &self.socket {
            SessionSocket::Datagram(socket) => {
                socket.connect(SocketAddr::V4(remote))?;
                tracing::debug!(session_id = self.id, %remote, "UDP session re-pinned");
                Ok(())
            }
            _ => Err(NetError::InvalidState(
                "connect_udp_session requires a UDP session",
            )),
        }
    }

    fn read_datagrams(&mut self) {
        let mut buf = [0u8; MAX_UDP_PAYLOAD];
        loop {
            let res = match &self.socket {
                SessionSocket::Datagram(socket) => socket.recv_from(&mut buf),
                _ => return,
            };
            match res {
                Ok((0, _)) => {
                    self.fail_recv(-libc::ECONNRESET, "Recvfrom failed.");
                    return;
                }
                Ok((n, from)) => {
                    let (from_addr, from_port) = addr_parts(from);
                    self.sink.post(SessionEvent::Datagram {
                        id: self.id,
                        data: Bytes::copy_from_slice(&buf[..n]),
                        from: Some((from_addr, from_port)),
                        arrival_time_us: Some(clock::monotonic_us()),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail_recv(errno_of(&e), "Recvfrom failed.");
                    return;
                }
            }
        }
    }

    fn read_stream(&mut self) {
        let mut chunk = [0u8; STREAM_READ_CHUNK];
        let mut closed = false;
        let mut fatal = None;

        loop {
            let res = match &mut self.socket {
                SessionSocket::Stream(stream) => stream.read(&mut chunk),
                _ => return,
            };
            match res {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    fatal = Some(errno_of(&e));
                    break;
                }
            }
        }

        // Frames already buffered are delivered before any error event.
        self.drain_inbound();

        if closed {
            self.fail_recv(-libc::ECONNRESET, "Recv failed.");
        } else if let Some(err) = fatal {
            self.fail_recv(err, "Recv failed.");
        }
    }

    fn drain_inbound(&mut self) {
        if !self.rtsp_framing {
            for payload in framing::drain_length_prefixed(&mut self.inbound) {
                self.sink.post(SessionEvent::Datagram {
                    id: self.id,
                    data: payload,
                    from: None,
                    arrival_time_us: None,
                });
            }
            return;
        }

        let Some(parser) = self.parser.clone() else {
            return;
        };
        loop {
            match framing::next_rtsp_frame(&mut self.inbound, parser.as_ref()) {
                RtspFrame::Stall => break,
                RtspFrame::Binary { channel, data } => {
                    self.sink.post(SessionEvent::BinaryData {
                        id: self.id,
                        channel,
                        data,
                        arrival_time_us: clock::monotonic_us(),
                    });
                }
                RtspFrame::Message(message) => {
                    self.sink.post(SessionEvent::Data {
                        id: self.id,
                        message,
                    });
                }
                RtspFrame::Malformed(message) => {
                    // The malformed message is still surfaced so the consumer
                    // can see what the peer sent; reading stops afterwards.
                    self.sink.post(SessionEvent::Data {
                        id: self.id,
                        message,
                    });
                    self.fail_recv(-libc::EPROTO, "Malformed RTSP message.");
                    break;
                }
            }
        }
    }

    /// Resolve a pending non-blocking connect once the socket turns writable.
    fn finish_connect(&mut self) {
        let res = match &self.socket {
            SessionSocket::Stream(stream) => stream.take_error(),
            _ => return,
        };
        match res {
            Ok(None) => {
                self.state = SessionState::Connected;
                tracing::debug!(session_id = self.id, "connection established");
                self.sink.post(SessionEvent::Connected { id: self.id });
            }
            Ok(Some(e)) => self.fail_send(errno_of(&e), "Connection failed"),
            Err(e) => self.fail_send(errno_of(&e), "Connection failed"),
        }
    }

    fn write_datagrams(&mut self) {
        loop {
            let Some(head) = self.out_datagrams.front_mut() else {
                return;
            };
            rtp::restamp_outbound(head, clock::monotonic_us());

            let res = match &self.socket {
                SessionSocket::Datagram(socket) => socket.send(head),
                _ => return,
            };
            match res {
                Ok(0) => {
                    self.fail_send(-libc::ECONNRESET, "Send datagram failed.");
                    return;
                }
                Ok(_) => {
                    self.out_datagrams.pop_front();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::debug!(
                        session_id = self.id,
                        queued = self.out_datagrams.len(),
                        "datagrams remain queued"
                    );
                    return;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail_send(errno_of(&e), "Send datagram failed.");
                    return;
                }
            }
        }
    }

    fn write_stream(&mut self) {
        loop {
            if self.out_stream.is_empty() {
                return;
            }
            let res = match &mut self.socket {
                SessionSocket::Stream(stream) => stream.write(&self.out_stream),
                _ => return,
            };
            match res {
                Ok(0) => {
                    self.fail_send(-libc::ECONNRESET, "Send failed.");
                    return;
                }
                Ok(n) => self.out_stream.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail_send(errno_of(&e), "Send failed.");
                    return;
                }
            }
        }
    }

    fn post_client_connected(&self) {
        let (local, peer) = match &self.socket {
            SessionSocket::Stream(stream) => match (stream.local_addr(), stream.peer_addr()) {
                (Ok(local), Ok(peer)) => (local, peer),
                (local, peer) => {
                    tracing::warn!(
                        session_id = self.id,
                        ?local,
                        ?peer,
                        "could not resolve endpoints of accepted connection"
                    );
                    return;
                }
            },
            _ => return,
        };

        let (server_ip, server_port) = addr_parts(local);
        let (client_ip, client_port) = addr_parts(peer);
        self.sink.post(SessionEvent::ClientConnected {
            id: self.id,
            server_ip,
            server_port,
            client_ip,
            client_port,
        });
    }

    fn fail_recv(&mut self, err: i32, detail: &str) {
        if self.saw_recv_failure {
            return;
        }
        self.saw_recv_failure = true;
        tracing::warn!(session_id = self.id, err, detail, "receive failure");
        self.sink.post(SessionEvent::Error {
            id: self.id,
            send: false,
            err,
            detail: detail.to_string(),
        });
    }

    fn fail_send(&mut self, err: i32, detail: &str) {
        if self.saw_send_failure {
            return;
        }
        self.saw_send_failure = true;
        tracing::warn!(session_id = self.id, err, detail, "send failure");
        self.sink.post(SessionEvent::Error {
            id: self.id,
            send: true,
            err,
            detail: detail.to_string(),
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(session_id = self.id, "session gone");
    }
}

/// Dotted-quad address and port for event fields.
fn addr_parts(addr: SocketAddr) -> (String, u16) {
    (addr.ip().to_string(), addr.port())
}

/// Negative errno for event reporting, in the spirit of the kernel
/// convention. Synthesized errors without an OS code fall back to the
/// closest classic value.
fn errno_of(e: &io::Error) -> i32 {
    match e.raw_os_error() {
        Some(code) => -code,
        None => match e.kind() {
            io::ErrorKind::ConnectionReset => -libc::ECONNRESET,
            io::ErrorKind::ConnectionRefused => -libc::ECONNREFUSED,
            _ => -libc::EIO,
        },
    }
}
