//! The reentrant, mode-aware lock itself.
//!
//! Grounded in the teacher's orchestration layer (`pool.rs`'s blocking
//! checkout with a deadline, `executor.rs`'s split between a blocking path
//! and a timed fallback, `timeout.rs`'s absorbing-vs-propagating
//! distinction) generalized from "hand a `WorkItem` to a pool slot" to
//! "transition a packed atomic state word".

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{IllegalStateReason, LockError};
use crate::permit::Permit;
use crate::state::{AtomicState, Mode, State, COUNT_MAX};
use crate::waiter::{ParkResult, RequestedMode, WaiterQueue};

/// Outcome of one non-blocking attempt to transition the state word.
enum Attempt {
    Acquired,
    MustWait,
    Overflow,
}

/// A reentrant, mode-aware exclusive/shared lock keyed by a caller-supplied
/// [`Permit`].
///
/// Any number of acquisitions by the same permit reenter without blocking;
/// acquisitions by a different permit wait. The two modes are mutually
/// exclusive: a mode switch is only possible by first draining the lock
/// back to free. See the crate documentation for the full state machine.
pub struct Lock {
    state: AtomicState,
    waiters: WaiterQueue,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    /// Creates a new, free lock.
    pub fn new() -> Self {
        Lock {
            state: AtomicState::new(),
            waiters: WaiterQueue::new(),
        }
    }

    // ── Blocking acquire ────────────────────────────────────────────────

    /// Acquires exclusive mode, blocking indefinitely. Uninterruptible: no
    /// [`CancelToken`] can unpark this call early.
    pub fn acquire_exclusive(&self, permit: Permit) -> Result<(), LockError> {
        self.acquire(RequestedMode::Exclusive, permit, None, None)
            .map(|_| ())
    }

    /// Acquires exclusive mode, blocking for at most `timeout`. Returns
    /// `Ok(true)` if acquired within the deadline, `Ok(false)` on timeout
    /// with state left unchanged. A zero (or already-elapsed) `timeout`
    /// never suspends the caller — it behaves exactly like
    /// [`try_acquire_exclusive`](Self::try_acquire_exclusive).
    pub fn acquire_exclusive_timeout(&self, permit: Permit, timeout: Duration) -> Result<bool, LockError> {
        self.acquire(RequestedMode::Exclusive, permit, Some(Instant::now() + timeout), None)
    }

    /// Acquires exclusive mode, blocking indefinitely unless `cancel` is
    /// cancelled first, in which case this returns
    /// `Err(LockError::Interrupted)` with state left unchanged.
    pub fn acquire_exclusive_interruptible(&self, permit: Permit, cancel: &CancelToken) -> Result<(), LockError> {
        self.acquire(RequestedMode::Exclusive, permit, None, Some(cancel))
            .map(|_| ())
    }

    /// Acquires exclusive mode with both a deadline and a cancellation
    /// token. `Ok(true)`/`Ok(false)` on the timed outcome,
    /// `Err(LockError::Interrupted)` if `cancel` fires first.
    pub fn acquire_exclusive_interruptible_timeout(
        &self,
        permit: Permit,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, LockError> {
        self.acquire(RequestedMode::Exclusive, permit, Some(Instant::now() + timeout), Some(cancel))
    }

    /// Acquires shared mode, blocking indefinitely.
    pub fn acquire_shared(&self, permit: Permit) -> Result<(), LockError> {
        self.acquire(RequestedMode::Shared, permit, None, None).map(|_| ())
    }

    /// Acquires shared mode, blocking for at most `timeout`.
    pub fn acquire_shared_timeout(&self, permit: Permit, timeout: Duration) -> Result<bool, LockError> {
        self.acquire(RequestedMode::Shared, permit, Some(Instant::now() + timeout), None)
    }

    /// Acquires shared mode, blocking indefinitely unless `cancel` fires.
    pub fn acquire_shared_interruptible(&self, permit: Permit, cancel: &CancelToken) -> Result<(), LockError> {
        self.acquire(RequestedMode::Shared, permit, None, Some(cancel))
            .map(|_| ())
    }

    /// Acquires shared mode with both a deadline and a cancellation token.
    pub fn acquire_shared_interruptible_timeout(
        &self,
        permit: Permit,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, LockError> {
        self.acquire(RequestedMode::Shared, permit, Some(Instant::now() + timeout), Some(cancel))
    }

    // ── Non-blocking probe ──────────────────────────────────────────────

    /// Attempts to acquire exclusive mode without ever suspending the
    /// caller or waking anyone else. `Ok(true)` iff the attempt succeeded
    /// immediately per the acquisition rules.
    ///
    /// # Footgun
    ///
    /// If `permit` already holds exclusive, this returns `Ok(true)` via
    /// reentrancy even though the lock is *not* free — it means "available
    /// to me", not "available". A deadlock probe that treats `Ok(true)` as
    /// "nobody holds this" will misreport when the probing permit is
    /// itself the current owner.
    pub fn try_acquire_exclusive(&self, permit: Permit) -> Result<bool, LockError> {
        match self.try_transition(RequestedMode::Exclusive, permit, false) {
            Attempt::Acquired => Ok(true),
            Attempt::MustWait => Ok(false),
            Attempt::Overflow => Err(LockError::IllegalState(IllegalStateReason::CountOverflow)),
        }
    }

    /// Attempts to acquire shared mode without ever suspending the caller.
    /// The shared-mode counterpart to [`try_acquire_exclusive`](Self::try_acquire_exclusive);
    /// not part of the original deadlock-probe use case but symmetric with
    /// it and equally non-blocking.
    pub fn try_acquire_shared(&self, permit: Permit) -> Result<bool, LockError> {
        match self.try_transition(RequestedMode::Shared, permit, false) {
            Attempt::Acquired => Ok(true),
            Attempt::MustWait => Ok(false),
            Attempt::Overflow => Err(LockError::IllegalState(IllegalStateReason::CountOverflow)),
        }
    }

    // ── Release ─────────────────────────────────────────────────────────

    /// Releases one exclusive hold. `permit` must be the current exclusive
    /// owner.
    pub fn release_exclusive(&self, permit: Permit) -> Result<(), LockError> {
        self.release(RequestedMode::Exclusive, Some(permit))
    }

    /// Releases one shared hold. Shared holders are anonymous: `permit` is
    /// not checked against anything beyond confirming the lock is currently
    /// held in shared mode at all, so `release_shared` never verifies the
    /// releaser previously acquired shared.
    pub fn release_shared(&self, _permit: Permit) -> Result<(), LockError> {
        self.release(RequestedMode::Shared, None)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn acquire(
        &self,
        mode: RequestedMode,
        permit: Permit,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<bool, LockError> {
        match self.try_transition(mode, permit, true) {
            Attempt::Acquired => return Ok(true),
            Attempt::Overflow => return Err(LockError::IllegalState(IllegalStateReason::CountOverflow)),
            Attempt::MustWait => {}
        }

        // A zero or already-elapsed deadline never suspends the caller.
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }

        let mut overflow = false;
        let park_result = self.waiters.wait_for(mode, deadline, cancel, || {
            match self.try_transition(mode, permit, false) {
                Attempt::Acquired => true,
                Attempt::Overflow => {
                    overflow = true;
                    true // stop parking; the error surfaces below
                }
                Attempt::MustWait => false,
            }
        });

        if overflow {
            return Err(LockError::IllegalState(IllegalStateReason::CountOverflow));
        }

        match park_result {
            ParkResult::Granted => Ok(true),
            ParkResult::TimedOut => Ok(false),
            ParkResult::Cancelled => Err(LockError::Interrupted),
        }
    }

    /// One CAS loop implementing the acquisition rules: free, same-permit
    /// exclusive reentry, or a shared join.
    ///
    /// `enforce_fairness` gates the anti-barging rule that keeps a new
    /// `Shared` join from overtaking an already-queued `Exclusive` waiter:
    /// the fast path and the blocking slow path both enforce it,
    /// `try_acquire_shared` does not (it is defined purely in terms of
    /// immediate state compatibility, never in terms of queue fairness).
    fn try_transition(&self, mode: RequestedMode, permit: Permit, enforce_fairness: bool) -> Attempt {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let next = match (current.mode, mode) {
                (Mode::Free, RequestedMode::Exclusive) => State {
                    mode: Mode::Exclusive,
                    count: 1,
                    permit,
                },
                (Mode::Free, RequestedMode::Shared) => State {
                    mode: Mode::Shared,
                    count: 1,
                    permit: Permit::new(0),
                },
                (Mode::Exclusive, RequestedMode::Exclusive) if current.permit == permit => {
                    if current.count == COUNT_MAX {
                        return Attempt::Overflow;
                    }
                    State {
                        mode: Mode::Exclusive,
                        count: current.count + 1,
                        permit,
                    }
                }
                (Mode::Shared, RequestedMode::Shared) => {
                    if enforce_fairness && self.waiters.exclusive_waiter_present() {
                        return Attempt::MustWait;
                    }
                    if current.count == COUNT_MAX {
                        return Attempt::Overflow;
                    }
                    State {
                        mode: Mode::Shared,
                        count: current.count + 1,
                        permit: Permit::new(0),
                    }
                }
                _ => return Attempt::MustWait,
            };

            match self.state.compare_exchange(current, next) {
                Ok(_) => {
                    log_transition(current, next);
                    return Attempt::Acquired;
                }
                Err(_) => continue,
            }
        }
    }

    fn release(&self, mode: RequestedMode, owning_permit: Option<Permit>) -> Result<(), LockError> {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let expected_mode = match mode {
                RequestedMode::Exclusive => Mode::Exclusive,
                RequestedMode::Shared => Mode::Shared,
            };
            if current.mode != expected_mode {
                return Err(LockError::IllegalState(IllegalStateReason::NotHeld));
            }
            if let Some(permit) = owning_permit {
                if current.permit != permit {
                    return Err(LockError::IllegalState(IllegalStateReason::WrongOwner {
                        attempted: permit,
                        owner: current.permit,
                    }));
                }
            }

            debug_assert!(current.count > 0, "a non-Free mode always has count > 0");
            let next = if current.count == 1 {
                State::FREE
            } else {
                State {
                    mode: current.mode,
                    count: current.count - 1,
                    permit: current.permit,
                }
            };

            match self.state.compare_exchange(current, next) {
                Ok(_) => {
                    log_transition(current, next);
                    if next.mode == Mode::Free {
                        // Publish-then-notify: the CAS above already made
                        // `Free` visible before this call, so there is no
                        // lost-wakeup window.
                        self.waiters.notify_all();
                    }
                    return Ok(());
                }
                Err(_) => continue,
            }
        }
    }
}

fn log_transition(from: State, to: State) {
    if from.mode != to.mode {
        log::debug!(
            "permit-lock: {:?}(count={}) -> {:?}(count={}, permit={})",
            from.mode,
            from.count,
            to.mode,
            to.count,
            to.permit
        );
    } else {
        log::trace!("permit-lock: {:?} count {} -> {}", to.mode, from.count, to.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const ALICE: Permit = Permit::new(11111);
    const BOB: Permit = Permit::new(22222);

    #[test]
    fn fresh_lock_allows_exclusive() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn exclusive_reenters_for_same_permit() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        assert!(lock.acquire_exclusive_timeout(ALICE, Duration::from_millis(1)).unwrap());
        lock.release_exclusive(ALICE).unwrap();
        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn exclusive_rejects_other_permit() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        assert!(!lock.acquire_exclusive_timeout(BOB, Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn shared_joins_freely_while_shared() {
        let lock = Lock::new();
        lock.acquire_shared(ALICE).unwrap();
        assert!(lock.acquire_shared_timeout(BOB, Duration::from_millis(1)).unwrap());
        lock.release_shared(ALICE).unwrap();
        lock.release_shared(BOB).unwrap();
    }

    #[test]
    fn exclusive_blocks_shared_and_vice_versa() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        assert!(!lock.acquire_shared_timeout(BOB, Duration::from_millis(1)).unwrap());
        lock.release_exclusive(ALICE).unwrap();

        lock.acquire_shared(ALICE).unwrap();
        assert!(!lock.acquire_exclusive_timeout(BOB, Duration::from_millis(1)).unwrap());
        lock.release_shared(ALICE).unwrap();
    }

    #[test]
    fn shared_never_silently_downgrades_for_the_exclusive_owner() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        assert!(!lock.acquire_shared_timeout(ALICE, Duration::from_millis(1)).unwrap());
        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn release_without_a_holder_is_illegal_state() {
        let lock = Lock::new();
        assert_eq!(
            lock.release_exclusive(ALICE).unwrap_err(),
            LockError::IllegalState(IllegalStateReason::NotHeld)
        );
        assert_eq!(
            lock.release_shared(ALICE).unwrap_err(),
            LockError::IllegalState(IllegalStateReason::NotHeld)
        );
    }

    #[test]
    fn release_exclusive_by_non_owner_is_illegal_state() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        let err = lock.release_exclusive(BOB).unwrap_err();
        assert_eq!(
            err,
            LockError::IllegalState(IllegalStateReason::WrongOwner {
                attempted: BOB,
                owner: ALICE
            })
        );
        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn try_acquire_exclusive_on_shared_fails_without_side_effect() {
        let lock = Lock::new();
        lock.acquire_shared(ALICE).unwrap();
        assert!(!lock.try_acquire_exclusive(BOB).unwrap());
        // No side effect: shared hold is still intact.
        assert!(lock.try_acquire_shared(BOB).unwrap());
        lock.release_shared(ALICE).unwrap();
        lock.release_shared(BOB).unwrap();
    }

    #[test]
    fn try_acquire_exclusive_reports_reentrancy_not_freedom() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        // Footgun: true here means "available to ALICE", not "free".
        assert!(lock.try_acquire_exclusive(ALICE).unwrap());
        lock.release_exclusive(ALICE).unwrap();
        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn zero_duration_timeout_never_blocks() {
        let lock = Lock::new();
        lock.acquire_exclusive(ALICE).unwrap();
        let start = Instant::now();
        assert!(!lock.acquire_exclusive_timeout(BOB, Duration::ZERO).unwrap());
        assert!(start.elapsed() < Duration::from_millis(50));
        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn interruptible_acquire_reports_interrupted() {
        let lock = Arc::new(Lock::new());
        lock.acquire_exclusive(ALICE).unwrap();

        let cancel = CancelToken::new();
        let cancel_for_thread = cancel.clone();
        let lock_for_thread = Arc::clone(&lock);
        let handle = thread::spawn(move || lock_for_thread.acquire_exclusive_interruptible(BOB, &cancel_for_thread));

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let result = handle.join().expect("thread panicked");
        assert_eq!(result, Err(LockError::Interrupted));

        lock.release_exclusive(ALICE).unwrap();
    }

    #[test]
    fn two_threads_exclusive_handoff() {
        let lock = Arc::new(Lock::new());
        lock.acquire_exclusive(ALICE).unwrap();

        let lock_for_b = Arc::clone(&lock);
        let handle = thread::spawn(move || lock_for_b.acquire_exclusive(BOB));

        // Give thread B a chance to enqueue before we release.
        thread::sleep(Duration::from_millis(20));
        lock.release_exclusive(ALICE).unwrap();

        handle.join().expect("thread panicked").unwrap();
        lock.release_exclusive(BOB).unwrap();
    }

    #[test]
    fn count_overflow_is_illegal_state() {
        let lock = Lock::new();
        for _ in 0..COUNT_MAX {
            lock.acquire_exclusive(ALICE).unwrap();
        }
        let err = lock.acquire_exclusive(ALICE).unwrap_err();
        assert_eq!(err, LockError::IllegalState(IllegalStateReason::CountOverflow));
    }
}
