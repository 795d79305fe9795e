//! Outbound RTP timestamp correction.
//!
//! Queued media datagrams can sit in the outbound queue long enough for
//! their RTP timestamps to go stale. Immediately before a send, MPEG-TS
//! packets (payload type 33, RFC 3551 §6) get their timestamp field
//! rewritten from the monotonic clock at the RTP 90 kHz scale.

/// MPEG-TS RTP payload type (RFC 3551 §6).
const PAYLOAD_TYPE_MP2T: u8 = 33;

/// Rewrite bytes 4..8 of an outbound RTP/MP2T packet with a fresh 90 kHz
/// timestamp derived from `now_us`. Returns whether a rewrite happened.
///
/// Only packets with version 2 / no padding / no extension / no CSRCs
/// (first byte exactly `0x80`) and payload type 33 are touched; anything
/// else passes through unmodified.
pub(crate) fn restamp_outbound(datagram: &mut [u8], now_us: i64) -> bool {
    if datagram.len() < 8 || datagram[0] != 0x80 || datagram[1] & 0x7f != PAYLOAD_TYPE_MP2T {
        return false;
    }

    let prev = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
    let rtp_time = (now_us * 9 / 100) as u32;
    datagram[4..8].copy_from_slice(&rtp_time.to_be_bytes());

    tracing::trace!(
        prev,
        rtp_time,
        correction_ms = (rtp_time.wrapping_sub(prev) as i32) as f64 / 90.0,
        "restamped outbound RTP packet"
    );

    true
}
