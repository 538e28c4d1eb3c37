use crate::{clock::Time, device::DeviceState, link::Received};
use std::{fmt, time::Duration};

/// A predicate over a received packet.
pub type PacketPredicate = Box<dyn Fn(&Received) -> bool>;

/// A predicate over the device, for waits that do not involve packets.
pub type StatePredicate = Box<dyn Fn(&DeviceState) -> bool>;

/// A deadline on the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timeout {
    deadline: Time,
}

impl Timeout {
    pub fn at(deadline: Time) -> Self {
        Self { deadline }
    }

    pub fn after(now: Time, duration: Duration) -> Self {
        Self::at(now + duration)
    }

    /// A timeout that elapses on the very next tick.
    pub fn next_tick(now: Time) -> Self {
        Self::at(now)
    }

    pub fn deadline(self) -> Time {
        self.deadline
    }

    pub fn is_elapsed(self, now: Time) -> bool {
        now >= self.deadline
    }
}

enum Trigger {
    Packet {
        predicate: PacketPredicate,
        aggregate: bool,
    },
    State(StatePredicate),
    Never,
}

/// Describes why a process is suspended and what resumes it.
///
/// A condition is consumed the moment the process resumes; the process hands
/// back a fresh one every time it suspends.
pub struct WaitCondition {
    trigger: Trigger,
    timeout: Option<Timeout>,
}

impl WaitCondition {
    /// Resumes on the first received packet matching `predicate`.
    pub fn packet(predicate: impl Fn(&Received) -> bool + 'static) -> Self {
        Self::from_trigger(Trigger::Packet {
            predicate: Box::new(predicate),
            aggregate: false,
        })
    }

    /// Resumes when any received packet matches `predicate`, delivering every
    /// packet of the tick that matches.
    pub fn packets(predicate: impl Fn(&Received) -> bool + 'static) -> Self {
        Self::from_trigger(Trigger::Packet {
            predicate: Box::new(predicate),
            aggregate: true,
        })
    }

    /// Resumes once `predicate` holds at the start of a tick.
    pub fn until(predicate: impl Fn(&DeviceState) -> bool + 'static) -> Self {
        Self::from_trigger(Trigger::State(Box::new(predicate)))
    }

    /// Never resumes unless a timeout is attached.
    pub fn never() -> Self {
        Self::from_trigger(Trigger::Never)
    }

    /// Resumes once `timeout` elapses.
    pub fn sleep(timeout: Timeout) -> Self {
        Self::never().timeout(timeout)
    }

    /// Attaches a timeout, replacing any earlier one.
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn deadline(&self) -> Option<Time> {
        self.timeout.map(Timeout::deadline)
    }

    pub fn accepts_packets(&self) -> bool {
        matches!(self.trigger, Trigger::Packet { .. })
    }

    /// Whether every matching packet of a tick is collected rather than just
    /// the first.
    pub fn aggregates(&self) -> bool {
        matches!(self.trigger, Trigger::Packet { aggregate: true, .. })
    }

    pub fn matches_packet(&self, received: &Received) -> bool {
        match &self.trigger {
            Trigger::Packet { predicate, .. } => predicate(received),
            _ => false,
        }
    }

    pub fn is_satisfied(&self, device: &DeviceState) -> bool {
        match &self.trigger {
            Trigger::State(predicate) => predicate(device),
            _ => false,
        }
    }

    pub fn is_elapsed(&self, now: Time) -> bool {
        self.timeout.is_some_and(|timeout| timeout.is_elapsed(now))
    }

    fn from_trigger(trigger: Trigger) -> Self {
        Self {
            trigger,
            timeout: None,
        }
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trigger = match self.trigger {
            Trigger::Packet {
                aggregate: false, ..
            } => "packet",
            Trigger::Packet {
                aggregate: true, ..
            } => "packets",
            Trigger::State(_) => "until",
            Trigger::Never => "never",
        };
        f.debug_struct("WaitCondition")
            .field("trigger", &trigger)
            .field("timeout", &self.timeout)
            .finish()
    }
}
