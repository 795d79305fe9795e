//! # wfdnet — multi-session network I/O core for Wi-Fi Display
//!
//! The transport substrate of a Wi-Fi Display (Miracast) stack: one
//! background worker multiplexes many heterogeneous sockets — RTSP
//! client/server connections, raw UDP datagram endpoints, and TCP-framed
//! datagram tunnels — and dispatches high-level events (connection
//! accepted, datagram received, message parsed, connection lost) to an
//! event sink owned by the caller.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Message framing over TCP, interleaved binary (`$`) channels |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Header layout for outbound timestamp correction |
//! | [RFC 3551](https://tools.ietf.org/html/rfc3551) | RTP A/V profile | Payload type 33 (MP2T) selection |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Caller threads                              │
//! │  NetworkSession — create / destroy / send   │
//! ├─────────────────────────────────────────────┤
//! │  Session table (one lock) + waker            │
//! ├─────────────────────────────────────────────┤
//! │  Worker thread                               │
//! │  Dispatcher — poll, accept, read, write     │
//! │  Session    — state machine, framing        │
//! ├─────────────────────────────────────────────┤
//! │  EventSink ← every session notification      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! All sockets are non-blocking and IPv4-only; the worker blocks solely in
//! the poll call. Control threads mutate the session table under its lock
//! and wake the worker, which re-evaluates readiness interest on the next
//! pass. Per-session events are delivered in production order.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::{mpsc, Arc};
//! use wfdnet::{NetworkSession, SessionEvent, TextParser};
//!
//! let mut net = NetworkSession::new();
//! net.start().unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//! net.create_rtsp_server("0.0.0.0".parse().unwrap(), 7236, Arc::new(TextParser), Arc::new(tx))
//!     .unwrap();
//!
//! for event in rx {
//!     if let SessionEvent::Error { id, .. } = &event {
//!         net.destroy_session(*id).unwrap();
//!     }
//!     println!("{event:?}");
//! }
//! ```
//!
//! ## Crate layout
//!
//! - [`network`] — [`NetworkSession`], the thread-safe control surface.
//! - [`event`] — [`SessionEvent`] and the [`EventSink`] capability.
//! - [`protocol`] — the [`RtspParser`] seam and default [`TextParser`].
//! - [`error`] — [`NetError`] and the [`Result`] alias.
//! - `session`, `dispatcher`, `transport` — internal: per-socket state
//!   machine, worker loop, socket construction.

pub mod error;
pub mod event;
pub mod network;
pub mod protocol;

mod clock;
mod dispatcher;
mod session;
mod transport;

pub use error::{NetError, Result};
pub use event::{EventSink, SessionEvent};
pub use network::NetworkSession;
pub use protocol::{MessageKind, ParseOutcome, RtspMessage, RtspParser, TextParser};
pub use session::SessionId;
