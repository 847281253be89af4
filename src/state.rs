//! The packed lock state word and the atomic it lives in.
//!
//! Three fields — `mode`, `count`, `permit` — packed into a single `u64` so
//! every transition is one `compare_exchange`: `mode: 16 | count: 16 |
//! permit: 32`. No auxiliary fields, no separate lock around the
//! permit-holder identity (the historical two-word design this supersedes).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::permit::Permit;

/// Hold count ceiling. `u16::MAX` comfortably clears the required `>=
/// 32767` floor while still fitting the 16-bit `count` field.
pub const COUNT_MAX: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Free,
    Exclusive,
    Shared,
}

impl Mode {
    const fn to_u16(self) -> u16 {
        match self {
            Mode::Free => 0,
            Mode::Exclusive => 1,
            Mode::Shared => 2,
        }
    }

    fn from_u16(raw: u16) -> Mode {
        match raw {
            0 => Mode::Free,
            1 => Mode::Exclusive,
            2 => Mode::Shared,
            other => unreachable!("invalid packed mode bits: {other}"),
        }
    }
}

/// The unpacked view of a lock state word. `Copy` and cheap to pass by
/// value; all mutation happens by packing a new `State` and CAS-ing the
/// atomic word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct State {
    pub mode: Mode,
    pub count: u16,
    pub permit: Permit,
}

impl State {
    pub const FREE: State = State {
        mode: Mode::Free,
        count: 0,
        permit: Permit::new(0),
    };

    fn pack(self) -> u64 {
        (self.mode.to_u16() as u64) << 48
            | (self.count as u64) << 32
            | (self.permit.value() as u32 as u64)
    }

    fn unpack(word: u64) -> State {
        let mode = Mode::from_u16(((word >> 48) & 0xFFFF) as u16);
        let count = ((word >> 32) & 0xFFFF) as u16;
        let permit = Permit::new((word & 0xFFFF_FFFF) as u32 as i32);
        State { mode, count, permit }
    }
}

/// The single atomic word backing a [`crate::Lock`].
pub(crate) struct AtomicState(AtomicU64);

impl AtomicState {
    pub fn new() -> Self {
        AtomicState(AtomicU64::new(State::FREE.pack()))
    }

    pub fn load(&self, order: Ordering) -> State {
        State::unpack(self.0.load(order))
    }

    /// One CAS over the full packed word. Release-acquire ordering on
    /// success publishes every write made under the previous holder to the
    /// next; failure returns the word actually observed so the caller can
    /// retry against fresh state without a second load.
    pub fn compare_exchange(&self, current: State, new: State) -> Result<State, State> {
        self.0
            .compare_exchange(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .map(State::unpack)
            .map_err(State::unpack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_state_round_trips() {
        let packed = State::FREE.pack();
        assert_eq!(State::unpack(packed), State::FREE);
    }

    #[test]
    fn exclusive_state_round_trips_negative_permit() {
        let state = State {
            mode: Mode::Exclusive,
            count: 3,
            permit: Permit::new(-11111),
        };
        assert_eq!(State::unpack(state.pack()), state);
    }

    #[test]
    fn shared_state_round_trips_max_count() {
        let state = State {
            mode: Mode::Shared,
            count: COUNT_MAX,
            permit: Permit::new(0),
        };
        assert_eq!(State::unpack(state.pack()), state);
    }

    #[test]
    fn atomic_state_starts_free() {
        let state = AtomicState::new();
        assert_eq!(state.load(Ordering::Acquire), State::FREE);
    }

    #[test]
    fn compare_exchange_fails_against_stale_expectation() {
        let atomic = AtomicState::new();
        let stale = State {
            mode: Mode::Exclusive,
            count: 1,
            permit: Permit::new(1),
        };
        let err = atomic.compare_exchange(stale, State::FREE).unwrap_err();
        assert_eq!(err, State::FREE);
    }

    #[test]
    fn compare_exchange_succeeds_and_publishes() {
        let atomic = AtomicState::new();
        let next = State {
            mode: Mode::Exclusive,
            count: 1,
            permit: Permit::new(11111),
        };
        atomic.compare_exchange(State::FREE, next).unwrap();
        assert_eq!(atomic.load(Ordering::Acquire), next);
    }
}
