//! Reentrant polling read/write lock with write-preferring exclusivity.
//!
//! A [`PollingRwLock`] tracks read and write holders per thread, so a thread
//! that already holds a role may re-acquire it freely, and a thread holding
//! the write lock may also take the read lock. Exclusivity checks only ever
//! consider *foreign* threads, which is what keeps reentrancy deadlock-free.
//!
//! # Exclusivity policy
//!
//! | Caller wants | Granted when                                              |
//! |--------------|-----------------------------------------------------------|
//! | read         | no foreign writer holds, and no writer is pending (unless the caller already holds either role) |
//! | write        | no foreign writer *and* no foreign reader holds           |
//!
//! A writer that cannot acquire registers in a pending-writer counter that
//! new readers consult, so a steady stream of readers cannot starve a
//! waiting writer. The flip side is the usual one: readers can starve under
//! continuous write pressure. A read→write upgrade is only granted once all
//! other readers are gone; two threads upgrading simultaneously with
//! [`Wait::Forever`] will deadlock, as with any upgrade-less rwlock.
//!
//! # Acquisition outcome
//!
//! Every acquisition resolves *pending → granted | rejected | timed-out*
//! and returns a [`LockToken`]:
//!
//! - granted: a valid owned token; dropping it releases the slot.
//! - timed-out, rejected by a validity predicate, or lock disposed: the
//!   invalid sentinel. None of these are errors or panics.
//!
//! Programmer errors (releasing on the wrong thread) are ruled out
//! statically: tokens are `!Send`.
//!
//! # Example
//!
//! ```
//! use relock::{PollingRwLock, Wait};
//!
//! let lock = PollingRwLock::new();
//!
//! let write = lock.acquire_write(Wait::Forever);
//! assert!(write.is_valid());
//!
//! // Writer-to-reader escalation on the same thread.
//! let read = lock.acquire_read(Wait::Forever);
//! assert!(read.is_valid());
//!
//! drop(read);
//! drop(write);
//! assert!(!lock.has_write_lock());
//! ```

use std::fmt;
use std::marker::PhantomData;

use crate::gate::PollingGate;
use crate::owner::OwnerTable;
use crate::wait::Wait;

/// The two tracked categories of lock holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Shared holder.
    Read,
    /// Exclusive holder.
    Write,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Everything the gate serializes: the two ownership tables, the
/// pending-writer count, and the disposed flag.
#[derive(Debug, Default)]
struct RwState {
    readers: OwnerTable,
    writers: OwnerTable,
    pending_writers: usize,
    disposed: bool,
}

impl RwState {
    /// Read grant predicate. Foreign writers exclude; a pending writer
    /// blocks fresh readers but not reentrant ones (blocking a thread that
    /// already holds a role would deadlock it against the waiting writer).
    fn read_grantable(&self) -> bool {
        if self.writers.holds_other() {
            return false;
        }
        self.pending_writers == 0 || self.readers.holds_current() || self.writers.holds_current()
    }

    /// Write grant predicate: no foreign holder of either role.
    fn write_grantable(&self) -> bool {
        !self.writers.holds_other() && !self.readers.holds_other()
    }

    fn table_mut(&mut self, role: Role) -> &mut OwnerTable {
        match role {
            Role::Read => &mut self.readers,
            Role::Write => &mut self.writers,
        }
    }
}

/// How an acquisition attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    TimedOut,
    Granted,
    Rejected,
    Disposed,
}

/// A reentrant, timeout-bounded, polling-based read/write lock.
#[derive(Debug, Default)]
pub struct PollingRwLock {
    gate: PollingGate<RwState>,
}

impl PollingRwLock {
    /// Creates a lock with the default 10–100ms backoff range.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: PollingGate::new(RwState::default()),
        }
    }

    /// Creates a lock whose gate backs off within a custom `[min, max)`
    /// millisecond range (normalized as in
    /// [`PollingGate::with_backoff`]).
    #[must_use]
    pub fn with_backoff(min_ms: u64, max_ms: u64) -> Self {
        Self {
            gate: PollingGate::with_backoff(RwState::default(), min_ms, max_ms),
        }
    }

    /// Acquires the read role within `wait`.
    ///
    /// Returns the invalid sentinel on timeout or after [`dispose`]
    /// (`dispose` resolves immediately, regardless of contention).
    pub fn acquire_read(&self, wait: Wait) -> LockToken<'_> {
        self.acquire_read_if(wait, || true)
    }

    /// Acquires the read role, then consults `validity` while still inside
    /// the gate; a false verdict refuses the grant and leaves no slot
    /// behind.
    pub fn acquire_read_if(&self, wait: Wait, validity: impl FnMut() -> bool) -> LockToken<'_> {
        self.acquire(Role::Read, wait, validity)
    }

    /// Acquires the write role within `wait`.
    ///
    /// While waiting, the caller counts as a pending writer, which blocks
    /// fresh readers (write priority). Returns the invalid sentinel on
    /// timeout or after [`dispose`].
    pub fn acquire_write(&self, wait: Wait) -> LockToken<'_> {
        self.acquire_write_if(wait, || true)
    }

    /// Acquires the write role with a validity predicate, as
    /// [`acquire_read_if`](Self::acquire_read_if).
    pub fn acquire_write_if(&self, wait: Wait, validity: impl FnMut() -> bool) -> LockToken<'_> {
        self.acquire(Role::Write, wait, validity)
    }

    fn acquire(&self, role: Role, wait: Wait, mut validity: impl FnMut() -> bool) -> LockToken<'_> {
        let mut resolution = Resolution::TimedOut;
        let mut pending = false;
        let granted = self.gate.run(wait, |state| {
            if state.disposed {
                if pending {
                    state.pending_writers -= 1;
                    pending = false;
                }
                resolution = Resolution::Disposed;
                return true;
            }
            let grantable = match role {
                Role::Read => state.read_grantable(),
                Role::Write => state.write_grantable(),
            };
            if !grantable {
                if role == Role::Write && !pending {
                    state.pending_writers += 1;
                    pending = true;
                }
                return false;
            }
            if pending {
                state.pending_writers -= 1;
                pending = false;
            }
            // The predicate runs before the slot exists, so a rejection (or
            // a panic in the predicate) cannot leak an entry.
            if validity() {
                state.table_mut(role).acquire_current();
                resolution = Resolution::Granted;
            } else {
                resolution = Resolution::Rejected;
            }
            true
        });

        if !granted && pending {
            // Timed out while registered as a pending writer; deregister
            // through the gate so blocked readers see a consistent count.
            self.gate.run(Wait::Forever, |state| {
                state.pending_writers = state.pending_writers.saturating_sub(1);
                true
            });
        }

        match resolution {
            Resolution::Granted => LockToken::owned(self, role),
            Resolution::TimedOut => {
                tracing::trace!(role = %role, wait = %wait, "acquisition timed out");
                LockToken::invalid()
            }
            Resolution::Rejected | Resolution::Disposed => LockToken::invalid(),
        }
    }

    /// Decrements the calling thread's slot for `role`. Reached only from
    /// token drop.
    pub(crate) fn release(&self, role: Role) {
        let done = self.gate.run(Wait::Forever, |state| {
            state.table_mut(role).release_current();
            true
        });
        debug_assert!(done, "infinite-wait release did not run");
    }

    /// Clears both ownership tables unconditionally.
    ///
    /// Tokens still outstanding become dangling; their eventual drop is a
    /// harmless no-op. The pending-writer count is left alone — those
    /// writers are still polling.
    pub fn force_release_all(&self) {
        self.gate.run(Wait::Forever, |state| {
            let (readers, writers) = (state.readers.len(), state.writers.len());
            state.readers.clear();
            state.writers.clear();
            tracing::debug!(readers, writers, "all lock holders force-released");
            true
        });
    }

    /// Permanently disposes the lock: every subsequent acquisition resolves
    /// immediately to the invalid sentinel. Threads currently polling
    /// observe the flag on their next attempt.
    pub fn dispose(&self) {
        self.gate.run(Wait::Forever, |state| {
            state.disposed = true;
            true
        });
        tracing::debug!("lock disposed");
    }

    /// True once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.query(|state| state.disposed)
    }

    /// True if any thread holds the read role.
    #[must_use]
    pub fn has_read_lock(&self) -> bool {
        self.query(|state| !state.readers.is_empty())
    }

    /// True if any thread holds the write role.
    #[must_use]
    pub fn has_write_lock(&self) -> bool {
        self.query(|state| !state.writers.is_empty())
    }

    /// True if the calling thread holds the read role.
    #[must_use]
    pub fn has_current_thread_read_lock(&self) -> bool {
        self.query(|state| state.readers.holds_current())
    }

    /// True if the calling thread holds the write role.
    #[must_use]
    pub fn has_current_thread_write_lock(&self) -> bool {
        self.query(|state| state.writers.holds_current())
    }

    /// True if a thread other than the caller holds the write role.
    #[must_use]
    pub fn has_other_thread_write_lock(&self) -> bool {
        self.query(|state| state.writers.holds_other())
    }

    /// Number of distinct threads holding the read role.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.query(|state| state.readers.len())
    }

    /// Number of distinct threads holding the write role.
    #[must_use]
    pub fn writer_count(&self) -> usize {
        self.query(|state| state.writers.len())
    }

    /// Number of writers currently waiting for the lock.
    #[must_use]
    pub fn pending_writers(&self) -> usize {
        self.query(|state| state.pending_writers)
    }

    /// Runs one read-only predicate through the gate with an infinite wait,
    /// yielding a consistent point-in-time snapshot.
    fn query<R>(&self, f: impl FnOnce(&RwState) -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        self.gate.run(Wait::Forever, |state| {
            let f = f.take().expect("query attempt ran twice");
            out = Some(f(state));
            true
        });
        out.expect("infinite-wait query did not run")
    }
}

/// Result of an acquisition: either a held, disposable slot or a sentinel.
///
/// An owned token releases its slot exactly once, on drop. Tokens are
/// `!Send`: release must happen on the thread that acquired, because the
/// bookkeeping decrement targets the *current* thread's entry.
#[must_use = "dropping the token immediately releases the slot"]
#[derive(Debug)]
pub struct LockToken<'a> {
    owner: Option<&'a PollingRwLock>,
    role: Role,
    valid: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockToken<'a> {
    /// The failure sentinel: not valid, dropping it is a no-op.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            owner: None,
            role: Role::Read,
            valid: false,
            _not_send: PhantomData,
        }
    }

    /// A valid sentinel with no owner, for callers that want a grant
    /// without per-thread slot tracking. Dropping it is a no-op.
    #[must_use]
    pub const fn valid_untracked() -> Self {
        Self {
            owner: None,
            role: Role::Read,
            valid: true,
            _not_send: PhantomData,
        }
    }

    fn owned(owner: &'a PollingRwLock, role: Role) -> Self {
        Self {
            owner: Some(owner),
            role,
            valid: true,
            _not_send: PhantomData,
        }
    }

    /// Whether the acquisition was granted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The held role, if this token tracks a slot.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.owner.map(|_| self.role)
    }

    /// Releases the slot now. Equivalent to dropping the token.
    pub fn release(self) {}
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        // `take` doubles as the consumed flag: the decrement can fire once.
        if let Some(owner) = self.owner.take() {
            owner.release(self.role);
        }
    }
}
