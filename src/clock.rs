//! Monotonic time source.
//!
//! Timestamps are nanoseconds since a process-wide origin pinned the first
//! time a clock is built. They never go backwards and are unaffected by
//! wall-clock adjustments, which is what both the capture timestamps and the
//! playback deadlines rely on. Because the origin is shared, readings from
//! different clock instances (capture header, recorder, player) sit on one
//! timeline.

use std::sync::OnceLock;

static ORIGIN: OnceLock<quanta::Instant> = OnceLock::new();

/// Nanosecond-resolution monotonic clock backed by `quanta`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    clock: quanta::Clock,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        ORIGIN.get_or_init(|| clock.now());
        Self { clock }
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nanoseconds elapsed since the process-wide origin.
    pub fn now_ns(&self) -> u64 {
        let origin = *ORIGIN.get().expect("origin pinned at construction");
        self.clock.now().duration_since(origin).as_nanos() as u64
    }
}
