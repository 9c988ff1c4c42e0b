//! Timeout-bounded retry/backoff executor.
//!
//! A [`PollingGate`] owns a piece of state and runs caller-supplied attempt
//! closures against it with exclusive access, serialized by a
//! [`SpinMutex`](crate::spin::SpinMutex). An attempt that reports failure is
//! retried after a randomized backoff sleep, within the budget described by
//! a [`Wait`]:
//!
//! - Failing to win the spin mutex is *transient contention*, not a counted
//!   attempt failure — the gate proceeds straight to backoff and retry.
//! - A panic inside the attempt releases the spin mutex first, then
//!   unwinds. It is never swallowed and the mutex is never left held.
//! - [`Wait::NoWait`] performs exactly one iteration; [`Wait::For`]
//!   subtracts wall-clock elapsed time (including the attempt's own
//!   execution) from the remaining budget at each checkpoint.
//!
//! The backoff interval is drawn uniformly from a `[min, max)` millisecond
//! range, 10–100 by default. Degenerate ranges are normalized at
//! construction: inverted bounds are swapped, equal bounds reset to the
//! defaults.
//!
//! The sleep is the only suspension point in the whole crate; there are no
//! condition variables and no wait queues, so no fairness of any kind is
//! guaranteed across contending callers.

#![allow(unsafe_code)]

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::spin::SpinMutex;
use crate::wait::Wait;

/// Default lower backoff bound, in milliseconds.
pub const DEFAULT_MIN_BACKOFF_MS: u64 = 10;

/// Default upper backoff bound, in milliseconds (exclusive).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 100;

/// Seedable xorshift64 generator for backoff jitter.
///
/// Same seed, same sequence. Statistical quality is irrelevant here; the
/// jitter only has to de-synchronize contending pollers.
#[derive(Debug)]
struct JitterRng {
    state: u64,
}

impl JitterRng {
    fn new(seed: u64) -> Self {
        Self {
            // xorshift has a zero fixed point.
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn from_entropy() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(nanos ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform draw from `[lo, hi)`. Requires `lo < hi`.
    fn next_range(&mut self, lo: u64, hi: u64) -> u64 {
        debug_assert!(lo < hi, "degenerate jitter range");
        lo + self.next_u64() % (hi - lo)
    }
}

/// Releases the spin mutex when dropped, so a panicking attempt cannot
/// leave it held.
struct SpinRelease<'a> {
    spin: &'a SpinMutex,
}

impl Drop for SpinRelease<'_> {
    #[inline]
    fn drop(&mut self) {
        let held = self.spin.release();
        debug_assert!(held, "spin mutex released while not held");
    }
}

/// A retry-with-backoff executor owning the state it protects.
#[derive(Debug)]
pub struct PollingGate<T> {
    spin: SpinMutex,
    state: UnsafeCell<T>,
    rng: Mutex<JitterRng>,
    min_backoff_ms: u64,
    max_backoff_ms: u64,
}

// Safety: all access to `state` goes through `run`, which serializes it
// under the spin mutex.
unsafe impl<T: Send> Send for PollingGate<T> {}
unsafe impl<T: Send> Sync for PollingGate<T> {}

impl<T> PollingGate<T> {
    /// Creates a gate with the default 10–100ms backoff range.
    #[must_use]
    pub fn new(state: T) -> Self {
        Self::with_backoff(state, DEFAULT_MIN_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS)
    }

    /// Creates a gate with a custom `[min, max)` backoff range in
    /// milliseconds.
    ///
    /// Inverted bounds are swapped; equal bounds are reset to the defaults.
    #[must_use]
    pub fn with_backoff(state: T, min_ms: u64, max_ms: u64) -> Self {
        let (mut min, mut max) = (min_ms, max_ms);
        if min > max {
            std::mem::swap(&mut min, &mut max);
        }
        if min == max {
            min = DEFAULT_MIN_BACKOFF_MS;
            max = DEFAULT_MAX_BACKOFF_MS;
        }
        Self {
            spin: SpinMutex::new(),
            state: UnsafeCell::new(state),
            rng: Mutex::new(JitterRng::from_entropy()),
            min_backoff_ms: min,
            max_backoff_ms: max,
        }
    }

    /// The normalized `(min, max)` backoff bounds in milliseconds.
    #[must_use]
    pub fn backoff_range(&self) -> (u64, u64) {
        (self.min_backoff_ms, self.max_backoff_ms)
    }

    /// Returns a mutable reference to the protected state.
    pub fn get_mut(&mut self) -> &mut T {
        self.state.get_mut()
    }

    /// Consumes the gate, returning the protected state.
    pub fn into_inner(self) -> T {
        self.state.into_inner()
    }

    /// Runs `attempt` with exclusive access until it returns true or the
    /// `wait` budget is exhausted.
    ///
    /// Returns whether some attempt ultimately returned true. See the
    /// module docs for the retry policy.
    pub fn run<F>(&self, wait: Wait, mut attempt: F) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        match wait.normalized() {
            Wait::NoWait => self.attempt_once(&mut attempt),
            Wait::Forever => loop {
                if self.attempt_once(&mut attempt) {
                    return true;
                }
                self.backoff_sleep();
            },
            Wait::For(budget) => {
                let mut remaining = budget;
                let mut checkpoint = Instant::now();
                loop {
                    if self.attempt_once(&mut attempt) {
                        return true;
                    }
                    self.backoff_sleep();
                    let now = Instant::now();
                    remaining = remaining.saturating_sub(now.duration_since(checkpoint));
                    checkpoint = now;
                    if remaining.is_zero() {
                        tracing::trace!(budget_ms = budget.as_millis() as u64, "polling budget exhausted");
                        return false;
                    }
                }
            }
        }
    }

    /// One iteration: win the spin mutex and run the attempt, or report
    /// transient contention as failure.
    fn attempt_once<F>(&self, attempt: &mut F) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        if !self.spin.try_acquire() {
            return false;
        }
        let _release = SpinRelease { spin: &self.spin };
        // Safety: the spin mutex is held for the duration of this borrow.
        let state = unsafe { &mut *self.state.get() };
        attempt(state)
    }

    fn backoff_sleep(&self) {
        let ms = self
            .rng
            .lock()
            .next_range(self.min_backoff_ms, self.max_backoff_ms);
        thread::sleep(Duration::from_millis(ms));
    }
}

impl<T: Default> Default for PollingGate<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::sync::mpsc;

    fn init_test(test_name: &str) {
        init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn no_wait_runs_exactly_one_attempt() {
        init_test("no_wait_runs_exactly_one_attempt");
        let gate = PollingGate::new(0_u32);

        let mut calls = 0;
        let ok = gate.run(Wait::NoWait, |state| {
            calls += 1;
            *state += 1;
            false
        });
        crate::assert_with_log!(!ok, "failing attempt reports failure", false, ok);
        crate::assert_with_log!(calls == 1, "exactly one attempt", 1, calls);

        let ok = gate.run(Wait::NoWait, |state| *state == 1);
        crate::assert_with_log!(ok, "state mutation visible to next attempt", true, ok);
        crate::test_complete!("no_wait_runs_exactly_one_attempt");
    }

    #[test]
    fn forever_retries_until_success() {
        init_test("forever_retries_until_success");
        let gate = PollingGate::with_backoff((), 1, 3);

        let mut calls = 0;
        let ok = gate.run(Wait::Forever, |_| {
            calls += 1;
            calls == 3
        });
        crate::assert_with_log!(ok, "eventually succeeds", true, ok);
        crate::assert_with_log!(calls == 3, "three attempts", 3, calls);
        crate::test_complete!("forever_retries_until_success");
    }

    #[test]
    fn bounded_budget_exhausts_on_permanent_failure() {
        init_test("bounded_budget_exhausts_on_permanent_failure");
        let gate = PollingGate::with_backoff((), 1, 3);

        let start = Instant::now();
        let ok = gate.run(Wait::from_millis(30), |_| false);
        crate::assert_with_log!(!ok, "budget exhausted", false, ok);
        let waited = start.elapsed() >= Duration::from_millis(30);
        crate::assert_with_log!(waited, "budget was actually consumed", true, waited);
        crate::test_complete!("bounded_budget_exhausts_on_permanent_failure");
    }

    #[test]
    fn backoff_range_normalization() {
        init_test("backoff_range_normalization");

        let inverted = PollingGate::with_backoff((), 100, 10);
        crate::assert_with_log!(
            inverted.backoff_range() == (10, 100),
            "inverted bounds swapped",
            (10, 100),
            inverted.backoff_range()
        );

        let degenerate = PollingGate::with_backoff((), 5, 5);
        crate::assert_with_log!(
            degenerate.backoff_range() == (DEFAULT_MIN_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS),
            "equal bounds reset to defaults",
            (DEFAULT_MIN_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS),
            degenerate.backoff_range()
        );

        let default = PollingGate::new(());
        crate::assert_with_log!(
            default.backoff_range() == (DEFAULT_MIN_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS),
            "defaults",
            (DEFAULT_MIN_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS),
            default.backoff_range()
        );
        crate::test_complete!("backoff_range_normalization");
    }

    #[test]
    fn panicking_attempt_releases_the_mutex() {
        init_test("panicking_attempt_releases_the_mutex");
        let gate = PollingGate::new(0_u32);

        let result = catch_unwind(AssertUnwindSafe(|| {
            gate.run(Wait::NoWait, |_| panic!("attempt failed hard"));
        }));
        crate::assert_with_log!(result.is_err(), "panic propagated", true, result.is_err());

        // The mutex must be free again.
        let ok = gate.run(Wait::NoWait, |_| true);
        crate::assert_with_log!(ok, "gate usable after panic", true, ok);
        crate::test_complete!("panicking_attempt_releases_the_mutex");
    }

    #[test]
    fn contended_mutex_is_transient_failure() {
        init_test("contended_mutex_is_transient_failure");
        let gate = Arc::new(PollingGate::with_backoff((), 1, 3));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.run(Wait::Forever, |_| {
                    entered_tx.send(()).expect("report entry");
                    // Hold the spin mutex until told to let go.
                    release_rx.recv().expect("await release signal");
                    true
                });
            })
        };

        entered_rx.recv().expect("holder entered");
        // The holder is inside its attempt, so the spin mutex is taken and a
        // NoWait run cannot even start an attempt.
        let ok = gate.run(Wait::NoWait, |_| true);
        crate::assert_with_log!(!ok, "no-wait loses to held mutex", false, ok);

        release_tx.send(()).expect("release holder");
        holder.join().expect("holder thread panicked");

        let ok = gate.run(Wait::NoWait, |_| true);
        crate::assert_with_log!(ok, "gate free after holder exits", true, ok);
        crate::test_complete!("contended_mutex_is_transient_failure");
    }

    #[test]
    fn jitter_rng_is_deterministic_and_in_range() {
        init_test("jitter_rng_is_deterministic_and_in_range");
        let mut a = JitterRng::new(42);
        let mut b = JitterRng::new(42);
        for _ in 0..100 {
            let (x, y) = (a.next_range(10, 100), b.next_range(10, 100));
            assert_eq!(x, y, "same seed, same sequence");
            assert!((10..100).contains(&x), "draw in [10, 100)");
        }

        // Zero seed must not produce the xorshift fixed point.
        let mut z = JitterRng::new(0);
        let drew = z.next_u64();
        crate::assert_with_log!(drew != 0, "zero seed escapes fixed point", true, drew != 0);
        crate::test_complete!("jitter_rng_is_deterministic_and_in_range");
    }
}
