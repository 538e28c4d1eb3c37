//! The virtual clock all timers in a simulation are measured against.

use std::{
    cell::Cell,
    fmt::{self, Display},
    ops::Add,
    rc::Rc,
    time::Duration,
};

/// An instant on the virtual clock, measured from the start of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(Duration);

impl Time {
    /// The moment the simulation starts.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Creates a time the given number of milliseconds after the start.
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// The time elapsed since the start of the simulation.
    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// How long after `earlier` this time is, or zero if `earlier` is later.
    pub fn saturating_since(self, earlier: Time) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Self::Output {
        Time(self.0 + rhs)
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClockState {
    now: Time,
    paused: bool,
}

/// A handle to a pausable, monotonic virtual clock.
///
/// Cloning a clock produces another handle to the same underlying time, so a
/// whole internetwork can share one clock. Time only moves when
/// [`advance`](Clock::advance) is called, which the [`Internet`](crate::Internet)
/// does between ticks.
#[derive(Debug, Clone, Default)]
pub struct Clock(Rc<Cell<ClockState>>);

impl Clock {
    /// Creates a new clock at [`Time::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The current virtual time.
    pub fn now(&self) -> Time {
        self.0.get().now
    }

    /// How much virtual time has passed since `earlier`.
    pub fn time_since(&self, earlier: Time) -> Duration {
        self.now().saturating_since(earlier)
    }

    /// Moves the clock forward. Returns false and leaves the time untouched
    /// if the clock is paused.
    pub fn advance(&self, by: Duration) -> bool {
        let mut state = self.0.get();
        if state.paused {
            return false;
        }
        state.now = state.now + by;
        self.0.set(state);
        true
    }

    /// Stops the clock until [`resume`](Clock::resume) is called.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Lets the clock move again.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.0.get().paused
    }

    fn set_paused(&self, paused: bool) {
        let mut state = self.0.get();
        state.paused = paused;
        self.0.set(state);
    }
}
