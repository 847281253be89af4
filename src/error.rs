//! Error kinds for the lock.
//!
//! Plain enums, no `thiserror`/`anyhow` — the teacher crate (`types.rs`'s
//! `ExecutionError`) favors hand-rolled `Debug`/`Clone`/`PartialEq` enums
//! over an error-derive crate, and this crate follows that.
//!
//! Timed-out is deliberately absent here: it is reported as the `bool`
//! result of a timed acquire, never raised as an error.

use std::error::Error;
use std::fmt;

use crate::permit::Permit;

/// Why a release (or a count increment) was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllegalStateReason {
    /// Released a mode that is not currently held (e.g. `release_exclusive`
    /// while the lock is `Shared`, or while it is `Free`).
    NotHeld,
    /// Released exclusive under a permit other than the current owner.
    WrongOwner {
        /// The permit the release call was made under.
        attempted: Permit,
        /// The permit that actually owns the exclusive hold.
        owner: Permit,
    },
    /// Incrementing `count` would carry it past [`crate::COUNT_MAX`].
    CountOverflow,
}

impl fmt::Display for IllegalStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IllegalStateReason::NotHeld => {
                write!(f, "lock is not held in the requested mode")
            }
            IllegalStateReason::WrongOwner { attempted, owner } => {
                write!(
                    f,
                    "permit {attempted} is not the exclusive owner (owner is {owner})"
                )
            }
            IllegalStateReason::CountOverflow => {
                write!(f, "hold count would exceed COUNT_MAX")
            }
        }
    }
}

/// Every failure mode the lock can report at runtime.
///
/// An invalid-argument variant has no place here: a missing permit is
/// unrepresentable once permits are non-optional arguments, see
/// [`crate::Permit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// A release call, or a count increment, violated the state machine.
    IllegalState(IllegalStateReason),
    /// The calling thread's [`CancelToken`](crate::CancelToken) was
    /// cancelled before the acquisition completed.
    Interrupted,
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::IllegalState(reason) => write!(f, "illegal lock state: {reason}"),
            LockError::Interrupted => write!(f, "acquisition was interrupted"),
        }
    }
}

impl Error for LockError {}
