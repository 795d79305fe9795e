//! Error types for the network-session core.

/// Errors returned synchronously by the control surface.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Setup**: [`Io`](Self::Io), [`HostResolve`](Self::HostResolve) —
///   socket/bind/listen/connect or name-resolution failure while creating a
///   session. No session is created.
/// - **Lifecycle**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotStarted`](Self::NotStarted).
/// - **Lookup**: [`SessionNotFound`](Self::SessionNotFound).
/// - **Usage**: [`InvalidState`](Self::InvalidState),
///   [`PayloadTooLarge`](Self::PayloadTooLarge).
///
/// Per-session I/O failures after setup are never returned here; they are
/// reported exactly once as an [`Error`](crate::SessionEvent::Error) event
/// and the session stops contributing readiness until destroyed.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Underlying I/O or socket error during session setup.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hostname did not resolve to any IPv4 address.
    #[error("no IPv4 address for host: {host}")]
    HostResolve { host: String },

    /// No session with the given ID exists in the session table.
    #[error("session not found: {0}")]
    SessionNotFound(crate::SessionId),

    /// [`NetworkSession::start`](crate::NetworkSession::start) was called
    /// while the worker is already running.
    #[error("worker already running")]
    AlreadyRunning,

    /// The operation requires a running worker
    /// ([`NetworkSession::start`](crate::NetworkSession::start) first).
    #[error("worker not started")]
    NotStarted,

    /// The session's state does not admit the operation
    /// (e.g. `send_request` on a listening socket).
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// A length-prefixed datagram payload exceeded the 16-bit frame limit.
    #[error("payload of {0} bytes exceeds the 65535-byte frame limit")]
    PayloadTooLarge(usize),
}

/// Convenience alias for `Result<T, NetError>`.
pub type Result<T> = std::result::Result<T, NetError>;
