//! FIFO waiter queue: suspended acquirers, parked on a single `Condvar`.
//!
//! Built the way the teacher's pool dispatcher (`pool.rs`) hands work to
//! idle slots — a `Mutex<VecDeque<_>>` paired with one `Condvar` — rather
//! than a futex or `parking_lot` — what matters is the contract a waiter
//! queue provides, not the mechanism.
//!
//! Waiters are never handed the lock directly (no baton passing): a release
//! publishes the new state with a single CAS and then broadcasts. Every
//! parked waiter wakes, re-checks whether it is *eligible* (no incompatible
//! predecessor ahead of it in the queue), and only an eligible waiter
//! retries the real acquisition CAS against live state. This means a
//! released lock can in principle be stolen by a brand-new, never-queued
//! caller between the release CAS and a waiter's retry; this is an
//! accepted race ("the standard race at the doorway") rather than something
//! the queue must prevent.
//!
//! The eligibility check and the CAS retry run while the queue's own mutex
//! is held, and the same guard is carried straight into `Condvar::wait`
//! with no gap in between. A release's `notify_all` therefore either lands
//! before the retry (so the retry's own CAS already sees the new state and
//! succeeds) or after the waiter is parked on the condvar (so the
//! broadcast wakes it); there is no window where it is dropped.
//!
//! `Condvar` gives no way to wake a specific parked thread from the
//! outside, so an interruptible wait cannot park indefinitely even with no
//! deadline of its own: it polls `cancel` on a short fixed interval via
//! `wait_timeout` instead of a single unbounded `wait`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestedMode {
    Exclusive,
    Shared,
}

struct WaiterNode {
    ticket: u64,
    mode: RequestedMode,
}

pub(crate) struct WaiterQueue {
    queue: Mutex<VecDeque<WaiterNode>>,
    cvar: Condvar,
    next_ticket: AtomicU64,
    /// Count of queued `Exclusive` waiters, kept outside the mutex so the
    /// fast path (shared join when `mode == Shared`) can check "is an
    /// exclusive waiter ahead of me" without locking anything.
    exclusive_waiters: AtomicUsize,
}

/// Outcome of parking for a slow-path acquisition.
pub(crate) enum ParkResult {
    Granted,
    TimedOut,
    Cancelled,
}

impl WaiterQueue {
    pub fn new() -> Self {
        WaiterQueue {
            queue: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
            next_ticket: AtomicU64::new(0),
            exclusive_waiters: AtomicUsize::new(0),
        }
    }

    /// `true` if a queued `Exclusive` waiter would be overtaken by a brand
    /// new `Shared` join right now. Used by the fast path only; `try_*`
    /// never consults this (it is about fairness, not state compatibility).
    pub fn exclusive_waiter_present(&self) -> bool {
        self.exclusive_waiters.load(Ordering::Acquire) > 0
    }

    /// Wakes every parked waiter after a release has published a new state.
    /// Must be called only after the state CAS to `Free` (or to a smaller
    /// `count`) has completed, never before — this is the no-lost-wakeup
    /// requirement for a correct release.
    pub fn notify_all(&self) {
        self.cvar.notify_all();
    }

    /// Parks the calling thread until `attempt` (the caller's CAS retry)
    /// succeeds, the optional `deadline` passes, or `cancel` fires.
    ///
    /// `attempt` is re-invoked only when this waiter is eligible (no
    /// incompatible predecessor ahead of it), while holding the queue's
    /// internal mutex; it may still freely touch the lock's atomic state,
    /// which lives behind its own separate `AtomicU64`, not this mutex.
    pub fn wait_for(
        &self,
        mode: RequestedMode,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
        mut attempt: impl FnMut() -> bool,
    ) -> ParkResult {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = self.queue.lock().expect("waiter queue poisoned");
            guard.push_back(WaiterNode { ticket, mode });
            if mode == RequestedMode::Exclusive {
                self.exclusive_waiters.fetch_add(1, Ordering::Release);
            }
        }

        let result = self.park_until_granted(ticket, mode, deadline, cancel, &mut attempt);

        let mut guard = self.queue.lock().expect("waiter queue poisoned");
        if let Some(pos) = guard.iter().position(|w| w.ticket == ticket) {
            guard.remove(pos);
            if mode == RequestedMode::Exclusive {
                self.exclusive_waiters.fetch_sub(1, Ordering::Release);
            }
        }
        drop(guard);
        // Leaving the queue may have unblocked the waiter behind us (e.g. a
        // shared waiter that was stuck behind our now-abandoned exclusive
        // request).
        if !matches!(result, ParkResult::Granted) {
            self.cvar.notify_all();
        }
        result
    }

    /// Upper bound on how long an interruptible, undeadlined wait parks
    /// before re-checking `cancel`. A `Condvar` has no way to target-wake
    /// one thread from outside, so cancellation can only be observed by
    /// waking up and polling the flag.
    const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

    fn park_until_granted(
        &self,
        ticket: u64,
        mode: RequestedMode,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
        attempt: &mut impl FnMut() -> bool,
    ) -> ParkResult {
        let mut guard = self.queue.lock().expect("waiter queue poisoned");
        loop {
            if let Some(cancel) = cancel {
                if cancel.is_cancelled() {
                    return ParkResult::Cancelled;
                }
            }

            // Eligibility and the CAS retry both run under `guard`, and the
            // same guard is carried straight into the wait below with no
            // gap — a release's notify_all can then never land in between.
            if Self::is_eligible(&guard, ticket, mode) && attempt() {
                return ParkResult::Granted;
            }

            let wait_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return ParkResult::TimedOut;
                    }
                    let remaining = deadline - now;
                    if cancel.is_some() {
                        remaining.min(Self::CANCEL_POLL_INTERVAL)
                    } else {
                        remaining
                    }
                }
                None if cancel.is_some() => Self::CANCEL_POLL_INTERVAL,
                None => {
                    guard = self.cvar.wait(guard).expect("waiter queue poisoned");
                    continue;
                }
            };

            // A spurious, timed-out, or poll-interval wakeup all fall
            // through to the top of the loop, where cancellation,
            // eligibility, and the deadline are each re-checked before
            // parking again — a grant racing either is never lost.
            let (next_guard, _) = self
                .cvar
                .wait_timeout(guard, wait_for)
                .expect("waiter queue poisoned");
            guard = next_guard;
        }
    }

    /// A waiter is eligible to retry its CAS iff no incompatible
    /// predecessor precedes it: an `Exclusive` waiter must be at the head;
    /// a `Shared` waiter may be preceded only by other `Shared` waiters
    /// (the "shared wake chain").
    fn is_eligible(queue: &VecDeque<WaiterNode>, ticket: u64, mode: RequestedMode) -> bool {
        for node in queue.iter() {
            if node.ticket == ticket {
                return true;
            }
            match mode {
                RequestedMode::Exclusive => return false,
                RequestedMode::Shared => {
                    if node.mode == RequestedMode::Exclusive {
                        return false;
                    }
                }
            }
        }
        // Our own node was removed already (shouldn't happen while parked).
        false
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.lock().expect("waiter queue poisoned").len()
    }
}
