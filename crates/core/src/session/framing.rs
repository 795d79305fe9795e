//! Stream framers for connected sessions.
//!
//! Two wire formats ride on connected TCP streams:
//!
//! - **Length-prefixed datagrams** (`is_rtsp_framing = false`):
//!   `[len_hi][len_lo][payload × len]`, big-endian.
//! - **RTSP text with an interleaved binary sub-channel**
//!   (`is_rtsp_framing = true`): either a `'$'[channel][len_hi][len_lo]`
//!   header followed by `len` payload bytes, or RTSP text delegated to the
//!   [`RtspParser`] seam.
//!
//! Framing boundaries are preserved exactly: each extracted frame produces
//! one downstream event, never split or merged. The functions here are pure
//! over the inbound buffer so they can be tested without sockets.

use bytes::{Buf, Bytes, BytesMut};

use crate::protocol::{ParseOutcome, RtspMessage, RtspParser};

/// Body of the Wi-Fi Display IDR request, as written by peers whose
/// `SET_PARAMETER` carries the off-by-two Content-Length (17 instead of 19).
const IDR_REQUEST_BODY: &[u8] = b"wfd_idr_request\r\n";

/// One frame extracted from an RTSP-framed stream.
#[derive(Debug)]
pub(crate) enum RtspFrame {
    /// Nothing complete in the buffer; wait for more bytes.
    Stall,
    /// An interleaved `$`-framed binary chunk.
    Binary { channel: u8, data: Bytes },
    /// A complete RTSP message.
    Message(RtspMessage),
    /// An unparseable head; the session must stop reading after this.
    Malformed(RtspMessage),
}

/// Extract every complete length-prefixed datagram from the buffer head.
pub(crate) fn drain_length_prefixed(buf: &mut BytesMut) -> Vec<Bytes> {
    let mut out = Vec::new();
    while buf.len() >= 2 {
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < len + 2 {
            break;
        }
        buf.advance(2);
        out.push(buf.split_to(len).freeze());
    }
    out
}

/// Extract the next frame from an RTSP-framed buffer, advancing past it.
pub(crate) fn next_rtsp_frame(buf: &mut BytesMut, parser: &dyn RtspParser) -> RtspFrame {
    if buf.is_empty() {
        return RtspFrame::Stall;
    }

    if buf[0] == b'$' {
        if buf.len() < 4 {
            return RtspFrame::Stall;
        }
        let channel = buf[1];
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return RtspFrame::Stall;
        }
        buf.advance(4);
        let data = buf.split_to(len).freeze();
        return RtspFrame::Binary { channel, data };
    }

    match parser.parse(buf) {
        ParseOutcome::Incomplete => RtspFrame::Stall,
        ParseOutcome::Message { message, consumed } => {
            let consumed = apply_idr_quirk(&message, consumed, buf);
            buf.advance(consumed.min(buf.len()));
            RtspFrame::Message(message)
        }
        ParseOutcome::Malformed { message, consumed } => {
            buf.advance(consumed.min(buf.len()));
            RtspFrame::Malformed(message)
        }
    }
}

/// Known peer bug: an IDR-request `SET_PARAMETER` declares Content-Length 17
/// where the body actually occupies 19 bytes on the wire. When the consumed
/// region is followed by the missing `\r\n`, swallow it so the next parse
/// starts on a message boundary.
fn apply_idr_quirk(message: &RtspMessage, consumed: usize, buf: &BytesMut) -> usize {
    if message.content() == Some(IDR_REQUEST_BODY)
        && buf.len() >= consumed + 2
        && &buf[consumed..consumed + 2] == b"\r\n"
    {
        consumed + 2
    } else {
        consumed
    }
}
