//! Process-local monotonic microsecond clock.
//!
//! Arrival stamps and RTP timestamp rewrites all derive from the same
//! origin, so values are mutually comparable for the process lifetime.

use std::sync::OnceLock;
use std::time::Instant;

static ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed on the monotonic clock since the origin was pinned.
pub(crate) fn monotonic_us() -> i64 {
    ORIGIN.get_or_init(Instant::now).elapsed().as_micros() as i64
}
