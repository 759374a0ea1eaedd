//! Process-start-anchored monotonic timestamps.
//!
//! Envelope timestamps must be monotonic and immune to wall-clock steps
//! (NTP, manual adjustments), so they are derived from an `Instant` anchored
//! once at first use.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds of monotonic time since the process started.
pub fn monotonic_nanos() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}
