//! Single-slot spin exclusion flag.
//!
//! [`SpinMutex`] is the leaf primitive everything else is built on: one
//! atomic bit, a non-blocking test-and-set, and a release that reports
//! whether the flag was actually held. It never spins internally — callers
//! decide how to retry (see [`PollingGate`](crate::gate::PollingGate)).
//!
//! There is no owner tracking, no fairness, and no recursion support. Any
//! thread may release, regardless of who acquired; a double release is
//! detected (via the return value) but not prevented.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

/// A single binary exclusion flag.
#[derive(Debug, Default)]
pub struct SpinMutex {
    locked: AtomicBool,
}

impl SpinMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Attempts the 0→1 transition.
    ///
    /// Returns true iff the flag was clear. Single attempt, no spin.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_ok()
    }

    /// Performs the 1→0 transition.
    ///
    /// Returns true iff the flag was set, so a double release reports
    /// false.
    #[inline]
    pub fn release(&self) -> bool {
        self.locked.swap(false, Release)
    }

    /// Returns true if the flag is currently set.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Acquire)
    }
}
