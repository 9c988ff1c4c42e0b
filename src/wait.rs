//! Timeout sentinels for polling acquisition.
//!
//! Acquisition budgets come in three shapes:
//!
//! | Variant          | Behavior                                        |
//! |------------------|-------------------------------------------------|
//! | [`Wait::Forever`] | Retry (with backoff) until the attempt succeeds |
//! | [`Wait::NoWait`]  | Exactly one attempt, no sleep, no retry         |
//! | [`Wait::For`]     | Retry within a wall-clock budget                |
//!
//! `Duration` is unsigned, so the "zero" and "negative" budgets of other
//! timeout conventions both collapse into [`Wait::NoWait`];
//! `Wait::For(Duration::ZERO)` normalizes to the same thing.

use std::fmt;
use std::time::Duration;

/// How long an acquisition is allowed to keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Retry indefinitely until the attempt succeeds.
    Forever,
    /// Perform exactly one attempt and report its outcome.
    NoWait,
    /// Retry until the budget is exhausted.
    For(Duration),
}

impl Wait {
    /// Builds a bounded wait from milliseconds; 0 means [`Wait::NoWait`].
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::NoWait
        } else {
            Self::For(Duration::from_millis(ms))
        }
    }

    /// Collapses a zero bounded budget into [`Wait::NoWait`].
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self {
            Self::For(d) if d.is_zero() => Self::NoWait,
            other => other,
        }
    }

    /// Returns true for [`Wait::Forever`].
    #[must_use]
    pub const fn is_forever(self) -> bool {
        matches!(self, Self::Forever)
    }
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Self {
        Self::For(d).normalized()
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => write!(f, "forever"),
            Self::NoWait => write!(f, "no-wait"),
            Self::For(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}
