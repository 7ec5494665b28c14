use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A trait for time sources that return the current wall-clock time in
/// milliseconds since the Unix epoch.
///
/// Real implementations may use a steady clock derived from the system clock
/// at startup, or the system clock directly. The rest of this crate tolerates
/// small non-monotonicity in a `TimeSource`: the sequence-throttling path in
/// [`crate::Snowfall::next_id`] handles `now < guid_last_generated_at` by
/// falling through to the "new millisecond" branch.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// A monotonic wall-clock source.
///
/// Captures `Instant::now()` and `SystemTime::now()` once at construction and
/// thereafter derives every timestamp from the monotonic `Instant`, so the
/// clock never observes a backward jump from an NTP adjustment or other
/// wall-clock correction. This avoids a `SystemTime::now()` syscall on every
/// call to [`Clock::now_ms`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
    start_ms: i64,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Anchors a new clock at the current wall-clock time.
    pub fn new() -> Self {
        let start = Instant::now();
        let start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX_EPOCH")
            .as_millis() as i64;
        Self { start, start_ms }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.start_ms + self.start.elapsed().as_millis() as i64
    }
}

/// A fixed or externally-steppable clock, used for deterministic tests.
///
/// Construct with [`FixedClock::new`] and advance it with [`FixedClock::set`]
/// or [`FixedClock::advance`] between assertions.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    /// Creates a clock pinned at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            millis: AtomicU64::new(now_ms as u64),
        }
    }

    /// Pins the clock to an absolute value.
    pub fn set(&self, now_ms: i64) {
        self.millis.store(now_ms as u64, Ordering::SeqCst);
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.millis
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst) as i64
    }
}
