//! Session events and the sink they are delivered through.
//!
//! Every session posts its lifecycle and data events to an [`EventSink`]
//! supplied at creation time. The sink is an abstract capability: it must
//! accept posts from the worker thread without blocking it and without
//! taking any lock a caller might hold while destroying sessions. An
//! unbounded [`std::sync::mpsc`] channel satisfies both, and the blanket
//! impl below lets a plain `Sender` be used directly.

use std::sync::mpsc;

use bytes::Bytes;

use crate::protocol::RtspMessage;
use crate::SessionId;

/// An event produced by a session and posted to its [`EventSink`].
///
/// All variants carry the originating session's ID. Events for one session
/// are posted in production order; ordering across sessions is unspecified.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A listening session accepted a connection; `id` is the newly born
    /// child session. Addresses are dotted-quad IPv4.
    ClientConnected {
        id: SessionId,
        server_ip: String,
        server_port: u16,
        client_ip: String,
        client_port: u16,
    },

    /// An outbound (client) connection completed its handshake.
    Connected { id: SessionId },

    /// A whole datagram arrived: either a UDP packet (`from` and
    /// `arrival_time_us` populated) or one length-prefixed frame extracted
    /// from a TCP datagram tunnel (both `None`).
    Datagram {
        id: SessionId,
        data: Bytes,
        from: Option<(String, u16)>,
        arrival_time_us: Option<i64>,
    },

    /// An interleaved `$`-framed binary chunk on an RTSP connection.
    BinaryData {
        id: SessionId,
        channel: u8,
        data: Bytes,
        arrival_time_us: i64,
    },

    /// A complete RTSP message extracted from the stream.
    Data { id: SessionId, message: RtspMessage },

    /// A terminal per-session I/O failure. `send` distinguishes the write
    /// path from the read path; `err` is a negative errno. The session stays
    /// in the table but contributes no further readiness; the consumer is
    /// expected to call
    /// [`destroy_session`](crate::NetworkSession::destroy_session).
    Error {
        id: SessionId,
        send: bool,
        err: i32,
        detail: String,
    },
}

impl SessionEvent {
    /// The session this event originated from.
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::ClientConnected { id, .. }
            | SessionEvent::Connected { id }
            | SessionEvent::Datagram { id, .. }
            | SessionEvent::BinaryData { id, .. }
            | SessionEvent::Data { id, .. }
            | SessionEvent::Error { id, .. } => *id,
        }
    }
}

/// Destination for session events.
///
/// `post` is called from the worker thread while the session table lock is
/// held, so implementations must not block and must not acquire locks shared
/// with control-surface callers.
pub trait EventSink: Send + Sync {
    fn post(&self, event: SessionEvent);
}

impl EventSink for mpsc::Sender<SessionEvent> {
    fn post(&self, event: SessionEvent) {
        // A dropped receiver is not an error: the consumer has simply
        // stopped listening.
        if self.send(event).is_err() {
            tracing::trace!("event sink receiver dropped");
        }
    }
}
