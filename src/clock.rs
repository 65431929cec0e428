//! Logical capture clock
//!
//! Capture times are logical ticks rather than wall-clock readings: each
//! intercepted call takes one tick, shared by its inputs and outputs
//! records. Ticks are unique within a context and increase in the order
//! calls start, so they work as the timestamp keys of the export registry.
//!
//! Threads are numbered the same way: the first thread to record gets index
//! 0, the next 1, and so on for the life of the process.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static NEXT_THREAD: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THREAD_INDEX: u32 = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
}

/// Small stable index of the calling thread, assigned on first use
pub fn thread_index() -> u32 {
    THREAD_INDEX.with(|index| *index)
}

/// Monotonic logical clock
///
/// Thread-safe; `tick()` is a single atomic `fetch_add`.
#[derive(Debug)]
pub struct CaptureClock {
    counter: AtomicU64,
}

impl CaptureClock {
    /// Create a clock starting at 0
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Take the next timestamp
    ///
    /// Returns the value before incrementing, so a fresh clock yields 0, 1, 2, ...
    pub fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}
