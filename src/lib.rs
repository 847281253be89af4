//! A reentrant, mode-aware coordination primitive keyed by a caller-supplied
//! permit.
//!
//! [`Lock`] behaves like a conventional reader-writer lock with two twists:
//!
//! - It is keyed by a caller-supplied [`Permit`]. Any number of
//!   acquisitions by the same permit reenter the lock without blocking;
//!   acquisitions by a different permit wait.
//! - Its two modes ([`Exclusive`](Lock::acquire_exclusive) and
//!   [`Shared`](Lock::acquire_shared)) are mutually exclusive: a mode
//!   switch is only possible by first draining the lock back to free —
//!   there is no upgrade path from shared to exclusive for the same
//!   permit.
//!
//! ```
//! use permit_lock::{Lock, Permit};
//!
//! let lock = Lock::new();
//! let writer = Permit::new(1);
//!
//! lock.acquire_exclusive(writer).unwrap();
//! // ... a multi-step transaction that may reenter recursively ...
//! lock.acquire_exclusive(writer).unwrap();
//! lock.release_exclusive(writer).unwrap();
//! lock.release_exclusive(writer).unwrap();
//! ```
//!
//! See [`Lock`] for the full set of blocking, timed, and interruptible
//! acquire variants, and [`LockError`] for the failure modes.

mod cancel;
mod error;
mod lock;
mod permit;
mod state;
mod waiter;

pub use cancel::CancelToken;
pub use error::{IllegalStateReason, LockError};
pub use lock::Lock;
pub use permit::Permit;
pub use state::COUNT_MAX;
