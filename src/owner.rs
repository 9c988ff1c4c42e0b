//! Per-role reentrancy bookkeeping keyed by thread identity.
//!
//! An [`OwnerTable`] records which threads currently hold one role (read or
//! write) and how many times each has re-acquired it. The table is *not*
//! internally synchronized: every access must be serialized externally, which
//! the lock does by keeping its tables inside a
//! [`PollingGate`](crate::gate::PollingGate).
//!
//! Invariants (debug-asserted):
//! - at most one entry per thread identity;
//! - a present entry has count ≥ 1;
//! - the entry is removed exactly when its count reaches 0.

use smallvec::SmallVec;
use std::thread::{self, ThreadId};

#[derive(Debug)]
struct OwnerEntry {
    thread: ThreadId,
    count: usize,
}

/// Reentrancy counts for one role, keyed by [`ThreadId`].
///
/// Most locks have a handful of concurrent holders, so entries live inline.
#[derive(Debug, Default)]
pub struct OwnerTable {
    entries: SmallVec<[OwnerEntry; 4]>,
}

impl OwnerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    fn position_of(&self, thread: ThreadId) -> Option<usize> {
        self.entries.iter().position(|e| e.thread == thread)
    }

    /// Records one acquisition by the calling thread.
    ///
    /// Creates an entry with count 1 if absent, otherwise increments it.
    pub fn acquire_current(&mut self) {
        let me = thread::current().id();
        match self.position_of(me) {
            Some(i) => {
                debug_assert!(self.entries[i].count >= 1, "present entry with zero count");
                self.entries[i].count += 1;
            }
            None => self.entries.push(OwnerEntry {
                thread: me,
                count: 1,
            }),
        }
    }

    /// Records one release by the calling thread.
    ///
    /// Decrements the entry and removes it at zero. A release with no entry
    /// is a no-op (this is what makes tokens left dangling by
    /// [`force_release_all`](crate::rwlock::PollingRwLock::force_release_all)
    /// harmless); the count never goes negative.
    pub fn release_current(&mut self) {
        let me = thread::current().id();
        if let Some(i) = self.position_of(me) {
            debug_assert!(self.entries[i].count >= 1, "present entry with zero count");
            self.entries[i].count -= 1;
            if self.entries[i].count == 0 {
                self.entries.swap_remove(i);
            }
        }
    }

    /// Number of distinct holding threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no thread holds this role.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reentrancy depth of the calling thread (0 if absent).
    #[must_use]
    pub fn current_count(&self) -> usize {
        let me = thread::current().id();
        self.position_of(me).map_or(0, |i| self.entries[i].count)
    }

    /// True if the calling thread holds this role.
    #[must_use]
    pub fn holds_current(&self) -> bool {
        let me = thread::current().id();
        self.position_of(me).is_some()
    }

    /// True if any *foreign* thread (an identity other than the caller's)
    /// holds this role.
    #[must_use]
    pub fn holds_other(&self) -> bool {
        let me = thread::current().id();
        self.entries.iter().any(|e| e.thread != me)
    }

    /// Drops every entry unconditionally, regardless of ownership.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(test_name: &str) {
        init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn reentrant_counts_balance_to_empty() {
        init_test("reentrant_counts_balance_to_empty");
        let mut table = OwnerTable::new();

        for _ in 0..3 {
            table.acquire_current();
        }
        crate::assert_with_log!(table.len() == 1, "one holding thread", 1usize, table.len());
        crate::assert_with_log!(
            table.current_count() == 3,
            "depth 3",
            3usize,
            table.current_count()
        );

        for _ in 0..3 {
            table.release_current();
        }
        let empty = table.is_empty();
        crate::assert_with_log!(empty, "table empty after balanced release", true, empty);
        crate::test_complete!("reentrant_counts_balance_to_empty");
    }

    #[test]
    fn release_beyond_held_count_is_noop() {
        init_test("release_beyond_held_count_is_noop");
        let mut table = OwnerTable::new();

        table.release_current();
        crate::assert_with_log!(table.is_empty(), "no-op on empty table", true, table.is_empty());

        table.acquire_current();
        table.release_current();
        table.release_current();
        crate::assert_with_log!(
            table.current_count() == 0,
            "count never negative",
            0usize,
            table.current_count()
        );
        crate::test_complete!("release_beyond_held_count_is_noop");
    }

    #[test]
    fn holds_other_sees_only_foreign_threads() {
        init_test("holds_other_sees_only_foreign_threads");
        let mut table = OwnerTable::new();
        table.acquire_current();
        crate::assert_with_log!(
            !table.holds_other(),
            "own entry is not foreign",
            false,
            table.holds_other()
        );

        // Add an entry from another thread by moving the table through it.
        let mut table = std::thread::spawn(move || {
            table.acquire_current();
            table
        })
        .join()
        .expect("owner thread panicked");

        crate::assert_with_log!(table.holds_other(), "foreign entry seen", true, table.holds_other());
        crate::assert_with_log!(table.len() == 2, "two holders", 2usize, table.len());
        crate::assert_with_log!(
            table.holds_current(),
            "own entry still present",
            true,
            table.holds_current()
        );

        table.clear();
        crate::assert_with_log!(table.is_empty(), "clear drops all entries", true, table.is_empty());
        crate::test_complete!("holds_other_sees_only_foreign_threads");
    }
}
