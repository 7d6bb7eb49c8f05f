//! Monotonic time base shared across the client.

use std::sync::OnceLock;
use std::time::Instant;

static CLOCK_ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Returns monotonic microseconds since the process-wide clock anchor.
///
/// The anchor is initialized on first use, so the earliest caller observes a
/// value near zero. All scheduling math in this crate (clock sync, playout
/// deadlines, buffer ledgers) runs in this time base; the absolute value
/// never leaves the process, so wall-clock steps cannot disturb playback.
#[must_use]
pub fn now_us() -> i64 {
    let anchor = CLOCK_ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_micros() as i64
}
