//! Polling-based synchronization primitives with reentrancy and timeouts.
//!
//! This crate provides a reentrant read/write lock built from three small
//! pieces:
//!
//! - [`SpinMutex`]: a single-slot atomic exclusion flag.
//! - [`PollingGate`]: a timeout-bounded retry/backoff executor that runs
//!   closures with exclusive access to a protected state.
//! - [`PollingRwLock`]: the public lock, composing per-role ownership
//!   tables and a disposed flag behind one gate.
//!
//! Coordination is entirely by active polling: a failed attempt sleeps a
//! randomized backoff interval and retries until it succeeds or its
//! [`Wait`] budget runs out. There are no condition variables and no OS
//! wait queues; the only suspension point is the backoff sleep.
//!
//! # Timeout contract
//!
//! Every acquisition takes a [`Wait`]:
//!
//! - [`Wait::Forever`] retries until the attempt succeeds.
//! - [`Wait::NoWait`] performs exactly one attempt, with no sleep.
//! - [`Wait::For`] retries within a wall-clock budget.
//!
//! # Reentrancy
//!
//! A thread that already holds a role may re-acquire it freely; exclusivity
//! checks only consider *foreign* threads. A thread holding the write lock
//! may also take the read lock (writer-to-reader escalation).
//!
//! # Example
//!
//! ```
//! use relock::{PollingRwLock, Wait};
//!
//! let lock = PollingRwLock::new();
//!
//! let token = lock.acquire_write(Wait::Forever);
//! assert!(token.is_valid());
//! drop(token); // releases the slot
//!
//! assert!(!lock.has_write_lock());
//! ```

#![deny(unsafe_code)]

pub mod gate;
pub mod owner;
pub mod rwlock;
pub mod spin;
pub mod wait;

#[cfg(test)]
pub(crate) mod test_utils;

pub use gate::PollingGate;
pub use owner::OwnerTable;
pub use rwlock::{LockToken, PollingRwLock, Role};
pub use spin::SpinMutex;
pub use wait::Wait;
