//! A process-wide monotonic clock in microseconds.
//!
//! The original stamps everything with `clock_gettime(CLOCK_MONOTONIC)`.
//! We do the same thing with `Instant`, just relative to a lazily-recorded
//! process start so timestamps fit in a plain `u64` and can live in an
//! `AtomicU64` field without any locking.

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

fn start() -> Instant {
    *START.get_or_init(Instant::now)
}

/// Microseconds elapsed since this process first called into the clock.
pub fn now_us() -> u64 {
    start().elapsed().as_micros() as u64
}
