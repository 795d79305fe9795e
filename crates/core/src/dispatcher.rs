//! The worker loop that drives every session.
//!
//! A single thread blocks in [`mio::Poll::poll`] with no timeout and owns
//! all per-session I/O. Control-surface threads never touch a socket; they
//! mutate the session table under its lock and nudge the worker through the
//! waker so the new state is picked up promptly.
//!
//! Within one pass, a ready session runs `read_more` before `write_more`,
//! and connections accepted during the pass are inserted into the table
//! only after every readiness event has been matched — the table is never
//! mutated while it is being dispatched against.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use mio::{Events, Poll};

use crate::network::{Inner, Shared, WAKER_TOKEN};
use crate::session::{Session, SessionSocket, SessionState};

const EVENT_CAPACITY: usize = 64;

pub(crate) fn run(inner: Arc<Inner>, mut poll: Poll) {
    let mut events = Events::with_capacity(EVENT_CAPACITY);

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(error = %e, "poll failed, worker exiting");
            return;
        }

        if inner.stop.load(Ordering::SeqCst) {
            tracing::debug!("worker stop requested");
            return;
        }

        let registry = poll.registry();
        let mut shared = inner.shared.lock();
        let mut staged: Vec<Session> = Vec::new();

        for event in events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                // The waker exists only to interrupt the poll; the table
                // re-evaluation below is the actual work.
                continue;
            }
            let id = token.0;

            if event.is_readable() {
                let is_listener = shared
                    .sessions
                    .get(&id)
                    .map(Session::is_listener)
                    .unwrap_or(false);
                if is_listener {
                    accept_ready(&mut shared, id, &mut staged);
                } else if let Some(session) = shared.sessions.get_mut(&id) {
                    session.read_more();
                }
            }

            if event.is_writable() {
                if let Some(session) = shared.sessions.get_mut(&id) {
                    session.write_more();
                }
            }

            if let Some(session) = shared.sessions.get_mut(&id) {
                if let Err(e) = session.sync_interest(registry) {
                    tracing::warn!(session_id = id, error = %e, "interest re-sync failed");
                }
            }
        }

        for mut child in staged {
            if let Err(e) = child.sync_interest(registry) {
                tracing::warn!(session_id = child.id(), error = %e, "child registration failed");
            }
            tracing::info!(session_id = child.id(), "accepted session added");
            shared.sessions.insert(child.id(), child);
        }
    }
}

/// Accept every pending connection on a listening session, staging the
/// children for insertion after the pass. Each child is born `Connected`,
/// inherits the listener's sink and parser, and frames its stream the way
/// the listener dictates.
fn accept_ready(shared: &mut Shared, id: usize, staged: &mut Vec<Session>) {
    loop {
        let res = match shared.sessions.get(&id) {
            Some(listener) => listener.try_accept(),
            None => return,
        };
        match res {
            Ok(Some((stream, peer))) => {
                let (rtsp_framing, parser, sink) = match shared.sessions.get(&id) {
                    Some(listener) => {
                        (listener.child_rtsp_framing(), listener.parser(), listener.sink())
                    }
                    None => return,
                };
                let child_id = shared.alloc_id();
                tracing::info!(listener = id, session_id = child_id, %peer, "incoming connection");
                staged.push(Session::new(
                    child_id,
                    SessionState::Connected,
                    SessionSocket::Stream(stream),
                    rtsp_framing,
                    parser,
                    sink,
                ));
            }
            Ok(None) => return,
            Err(e) => {
                // The listener stays up; a failed accept affects only the
                // connection that was being taken.
                tracing::error!(listener = id, error = %e, "accept failed");
                return;
            }
        }
    }
}
