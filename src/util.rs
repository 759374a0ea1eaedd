//! Small shared helpers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Rate limiter for log lines on hot error paths.
///
/// A transfer that fails in a tight retry loop can emit thousands of
/// identical lines per second; callers log the first occurrence and then
/// one in every `every` after that, with the running count attached.
#[derive(Debug)]
pub struct LogThrottle {
    count: AtomicU64,
    every: u64,
}

impl LogThrottle {
    pub const fn new(every: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            every,
        }
    }

    /// Register one occurrence. Returns `Some(total)` when this one should
    /// be logged.
    pub fn tick(&self) -> Option<u64> {
        let n = self.count.fetch_add(1, Ordering::Relaxed);
        if n % self.every == 0 { Some(n + 1) } else { None }
    }
}
