//! Thread-safe control surface over the session table.
//!
//! [`NetworkSession`] is the public face of the core: callers create and
//! destroy sessions, queue outbound data, and receive everything else
//! through their [`EventSink`]. All operations lock the session table,
//! apply the mutation, and wake the worker so it observes the new state
//! without waiting for unrelated traffic.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::{Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::clock;
use crate::dispatcher;
use crate::error::{NetError, Result};
use crate::event::EventSink;
use crate::protocol::RtspParser;
use crate::session::{Session, SessionId, SessionSocket, SessionState};
use crate::transport;

/// Token reserved for the worker wakeup channel; session ids start at 1.
pub(crate) const WAKER_TOKEN: Token = Token(0);

/// Session table plus the worker-coordination handles, all behind one lock.
pub(crate) struct Shared {
    pub(crate) sessions: HashMap<SessionId, Session>,
    next_id: SessionId,
    registry: Option<Registry>,
    waker: Option<Arc<Waker>>,
}

impl Shared {
    /// Next dense session id. Ids are never reused within an instance, so a
    /// stale readiness token can never address a newborn session.
    pub(crate) fn alloc_id(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

pub(crate) struct Inner {
    pub(crate) shared: Mutex<Shared>,
    pub(crate) stop: AtomicBool,
}

/// Multi-session network I/O host.
///
/// One instance owns one worker thread and any number of sessions. Each
/// session delivers its events to the sink supplied at creation; errors
/// reported through events leave the session in the table for the consumer
/// to [`destroy_session`](Self::destroy_session).
///
/// # Example
///
/// ```no_run
/// use std::sync::{mpsc, Arc};
/// use wfdnet::{NetworkSession, TextParser};
///
/// let mut net = NetworkSession::new();
/// net.start().unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// let id = net
///     .create_rtsp_server("0.0.0.0".parse().unwrap(), 7236, Arc::new(TextParser), Arc::new(tx))
///     .unwrap();
///
/// while let Ok(event) = rx.recv() {
///     println!("{event:?}");
/// }
/// # let _ = id;
/// ```
pub struct NetworkSession {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl NetworkSession {
    pub fn new() -> Self {
        // Pin the monotonic origin before any session can stamp a packet.
        clock::monotonic_us();

        NetworkSession {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    sessions: HashMap::new(),
                    next_id: 1,
                    registry: None,
                    waker: None,
                }),
                stop: AtomicBool::new(false),
            }),
            worker: None,
        }
    }

    /// Spawn the worker thread. Sessions can only be created while the
    /// worker is running.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(NetError::AlreadyRunning);
        }

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let registry = poll.registry().try_clone()?;

        {
            let mut shared = self.inner.shared.lock();
            shared.registry = Some(registry);
            shared.waker = Some(waker);
        }
        self.inner.stop.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("wfdnet-worker".to_string())
            .spawn(move || dispatcher::run(inner, poll));
        match spawned {
            Ok(worker) => self.worker = Some(worker),
            Err(e) => {
                let mut shared = self.inner.shared.lock();
                shared.registry = None;
                shared.waker = None;
                return Err(e.into());
            }
        }

        tracing::info!("network worker started");
        Ok(())
    }

    /// Request worker exit, join it, and drop every remaining session
    /// (closing each socket exactly once).
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Err(NetError::NotStarted);
        };

        self.inner.stop.store(true, Ordering::SeqCst);
        let waker = self.inner.shared.lock().waker.clone();
        wake(&waker);
        if worker.join().is_err() {
            tracing::error!("worker thread panicked");
        }

        let mut shared = self.inner.shared.lock();
        shared.sessions.clear();
        shared.registry = None;
        shared.waker = None;

        tracing::info!("network worker stopped");
        Ok(())
    }

    /// Open a non-blocking TCP connection to an RTSP peer.
    ///
    /// The session starts in `Connecting`; a `Connected` event follows once
    /// the handshake resolves, or an `Error` event if it fails.
    pub fn create_rtsp_client(
        &self,
        host: &str,
        port: u16,
        parser: Arc<dyn RtspParser>,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionId> {
        let mut shared = self.lock_started()?;
        let remote = transport::resolve_ipv4(host, port)?;
        let stream = transport::tcp::connect(remote)?;
        tracing::info!(%remote, "connecting RTSP client");
        insert_session(
            &mut shared,
            SessionState::Connecting,
            SessionSocket::Stream(stream),
            true,
            Some(parser),
            sink,
        )
    }

    /// Listen for RTSP connections on `addr:port`.
    ///
    /// Each accepted connection becomes its own session (announced through
    /// `ClientConnected`) speaking RTSP with the given parser.
    pub fn create_rtsp_server(
        &self,
        addr: Ipv4Addr,
        port: u16,
        parser: Arc<dyn RtspParser>,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionId> {
        let mut shared = self.lock_started()?;
        let listener = transport::tcp::listen(addr, port)?;
        tracing::info!(%addr, port, "RTSP server listening");
        insert_session(
            &mut shared,
            SessionState::ListeningRtsp,
            SessionSocket::Listener(listener),
            true,
            Some(parser),
            sink,
        )
    }

    /// Bind a UDP endpoint on `local_port`, optionally connected to
    /// `remote` right away.
    pub fn create_udp_session(
        &self,
        local_port: u16,
        remote: Option<(&str, u16)>,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionId> {
        let mut shared = self.lock_started()?;
        let remote = match remote {
            Some((host, port)) => Some(transport::resolve_ipv4(host, port)?),
            None => None,
        };
        let socket = transport::udp::bind(local_port, remote)?;
        insert_session(
            &mut shared,
            SessionState::Datagram,
            SessionSocket::Datagram(socket),
            false,
            None,
            sink,
        )
    }

    /// Listen for TCP datagram-tunnel connections on `addr:port`.
    ///
    /// Accepted children carry 16-bit length-prefixed datagrams.
    pub fn create_tcp_datagram_server(
        &self,
        addr: Ipv4Addr,
        port: u16,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionId> {
        let mut shared = self.lock_started()?;
        let listener = transport::tcp::listen(addr, port)?;
        tracing::info!(%addr, port, "TCP datagram server listening");
        insert_session(
            &mut shared,
            SessionState::ListeningTcpDgrams,
            SessionSocket::Listener(listener),
            false,
            None,
            sink,
        )
    }

    /// Open a non-blocking TCP datagram-tunnel connection to a remote peer,
    /// optionally from a fixed `local_port` (0 picks an ephemeral one).
    pub fn create_tcp_datagram_client(
        &self,
        local_port: u16,
        host: &str,
        port: u16,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionId> {
        let mut shared = self.lock_started()?;
        let remote = transport::resolve_ipv4(host, port)?;
        let stream = if local_port != 0 {
            transport::tcp::connect_from(local_port, remote)?
        } else {
            transport::tcp::connect(remote)?
        };
        tracing::info!(%remote, local_port, "connecting TCP datagram client");
        insert_session(
            &mut shared,
            SessionState::Connecting,
            SessionSocket::Stream(stream),
            false,
            None,
            sink,
        )
    }

    /// Re-pin an existing UDP session to a (new) remote peer.
    pub fn connect_udp_session(&self, id: SessionId, host: &str, port: u16) -> Result<()> {
        let mut shared = self.inner.shared.lock();
        let remote = transport::resolve_ipv4(host, port)?;
        let session = shared
            .sessions
            .get_mut(&id)
            .ok_or(NetError::SessionNotFound(id))?;
        session.connect_peer(remote)
    }

    /// Queue outbound data on a session. Success means the bytes are queued
    /// before any later write round for this session runs.
    pub fn send_request(&self, id: SessionId, data: &[u8]) -> Result<()> {
        let mut shared = self.inner.shared.lock();
        let Shared {
            sessions,
            registry,
            waker,
            ..
        } = &mut *shared;

        let session = sessions.get_mut(&id).ok_or(NetError::SessionNotFound(id))?;
        session.send_request(data)?;
        if let Some(registry) = registry.as_ref() {
            session.sync_interest(registry)?;
        }
        wake(waker);
        Ok(())
    }

    /// Remove a session from the table and close its socket.
    pub fn destroy_session(&self, id: SessionId) -> Result<()> {
        let mut shared = self.inner.shared.lock();
        let Shared {
            sessions,
            registry,
            waker,
            ..
        } = &mut *shared;

        let mut session = sessions.remove(&id).ok_or(NetError::SessionNotFound(id))?;
        if let Some(registry) = registry.as_ref() {
            session.deregister(registry);
        }
        drop(session);
        wake(waker);
        tracing::debug!(session_id = id, remaining = sessions.len(), "session destroyed");
        Ok(())
    }

    fn lock_started(&self) -> Result<parking_lot::MutexGuard<'_, Shared>> {
        let shared = self.inner.shared.lock();
        if shared.registry.is_none() {
            return Err(NetError::NotStarted);
        }
        Ok(shared)
    }
}

impl Default for NetworkSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NetworkSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn insert_session(
    shared: &mut Shared,
    state: SessionState,
    socket: SessionSocket,
    rtsp_framing: bool,
    parser: Option<Arc<dyn RtspParser>>,
    sink: Arc<dyn EventSink>,
) -> Result<SessionId> {
    let id = shared.alloc_id();
    let mut session = Session::new(id, state, socket, rtsp_framing, parser, sink);

    let Some(registry) = shared.registry.as_ref() else {
        return Err(NetError::NotStarted);
    };
    session.sync_interest(registry)?;

    shared.sessions.insert(id, session);
    wake(&shared.waker);
    tracing::debug!(session_id = id, total = shared.sessions.len(), "session created");
    Ok(id)
}

/// Best-effort worker wakeup; failures are logged and ignored.
fn wake(waker: &Option<Arc<Waker>>) {
    if let Some(waker) = waker {
        if let Err(e) = waker.wake() {
            tracing::warn!(error = %e, "error waking worker");
        }
    }
}
