//! Pre-buffering gate for playback streams
//!
//! Output stays silent until enough audio has been buffered to ride out
//! producer jitter, and goes back to warming up when the buffer runs dry.

use std::sync::atomic::{AtomicBool, Ordering};

use super::Direction;

/// Two-state gate: priming (emit silence) or running (emit data)
///
/// Holds no lock of its own. Callers invoke the observers while holding the
/// ring-buffer lock whose backlog snapshot drove the decision.
#[derive(Debug)]
pub struct PrimingController {
    priming: AtomicBool,
}

impl PrimingController {
    pub fn new(direction: Direction) -> Self {
        Self {
            priming: AtomicBool::new(direction.starts_priming()),
        }
    }

    pub fn is_priming(&self) -> bool {
        self.priming.load(Ordering::Acquire)
    }

    /// Leave priming once `buffered` reaches `threshold`
    ///
    /// Returns `true` only on the transition.
    pub fn observe_buffered(&self, buffered: usize, threshold: usize) -> bool {
        buffered >= threshold
            && self
                .priming
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Re-arm after the ring buffer was seen empty during playback
    ///
    /// Returns `true` only on the transition.
    pub fn observe_drained(&self) -> bool {
        self.priming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Back to the initial state for `direction`
    pub fn reset(&self, direction: Direction) {
        self.priming
            .store(direction.starts_priming(), Ordering::Release);
    }
}
