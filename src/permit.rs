//! Caller-supplied permit identity.
//!
//! A [`Permit`] identifies the logical owner of an exclusive hold. It is
//! opaque to the lock: equality is the only predicate ever used against it.
//! Two different threads presenting the same permit are treated as the same
//! holder and reenter the lock freely.

use std::fmt;

/// Identifies the logical owner of an exclusive hold, or "any holder" in
/// shared mode (where the permit is not tracked at all).
///
/// `0` is reserved: it is the value installed internally whenever the lock
/// is `Free` or `Shared`, so a caller-supplied permit of `0` can never be
/// confused with a real exclusive owner by [`Lock::try_acquire_exclusive`]'s
/// reentrancy check.
///
/// [`Lock::try_acquire_exclusive`]: crate::Lock::try_acquire_exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Permit(i32);

impl Permit {
    /// Wraps `value` as a permit. Every `i32` is a valid permit; there is no
    /// "missing permit" representation here — operations take `Permit` by
    /// value rather than `Option<Permit>`, so an invalid-argument check for
    /// a null/absent permit is a compile-time guarantee instead of a runtime
    /// one.
    pub const fn new(value: i32) -> Self {
        Permit(value)
    }

    /// The raw identifier this permit wraps.
    pub const fn value(self) -> i32 {
        self.0
    }

    pub(crate) const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Permit {
    fn from(value: i32) -> Self {
        Permit::new(value)
    }
}
