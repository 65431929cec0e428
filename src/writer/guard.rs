//! Thread-local re-entrancy guard and active-call stack
//!
//! A capture (argument capture + record write) entered while another
//! capture is in progress on the same thread is re-entrant: a `Capture`
//! implementation that itself calls a traced operation, for example. The
//! guard counts nesting per thread and refuses entry at the configured
//! depth, so the writer lock is never requested re-entrantly.
//!
//! The active-call stack records which traced operations are executing on
//! the current thread; it names suspects when a record cannot be written.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

thread_local! {
    static CAPTURE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static ACTIVE_CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Held while a capture is in progress on this thread
#[derive(Debug)]
pub struct CaptureGuard {
    // Tied to the thread whose counter it incremented
    _not_send: PhantomData<*const ()>,
}

impl CaptureGuard {
    /// Enter a capture unless `max_depth` captures are already in progress
    pub fn enter(max_depth: usize) -> Option<Self> {
        CAPTURE_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= max_depth {
                None
            } else {
                depth.set(current + 1);
                Some(Self {
                    _not_send: PhantomData,
                })
            }
        })
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Captures currently in progress on this thread
pub fn capture_depth() -> usize {
    CAPTURE_DEPTH.with(Cell::get)
}

/// Whether [`CaptureGuard::enter`] would succeed at `max_depth` right now
pub fn admits(max_depth: usize) -> bool {
    capture_depth() < max_depth
}

/// Marks a traced operation as executing on this thread
#[derive(Debug)]
pub struct ActiveCall {
    _not_send: PhantomData<*const ()>,
}

impl ActiveCall {
    pub fn enter(qualified_name: String) -> Self {
        ACTIVE_CALLS.with(|calls| calls.borrow_mut().push(qualified_name));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        ACTIVE_CALLS.with(|calls| {
            calls.borrow_mut().pop();
        });
    }
}

/// Traced operations executing on this thread, innermost last
pub fn active_calls() -> Vec<String> {
    ACTIVE_CALLS.with(|calls| calls.borrow().clone())
}
