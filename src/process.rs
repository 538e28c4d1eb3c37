//! The [`Process`] trait and supporting types.
//!
//! A process is a resumable unit of protocol logic. The scheduler calls
//! [`Process::advance`] whenever the process's last [`WaitCondition`] is
//! satisfied, and the process runs until it either needs to wait again or is
//! finished. Processes keep their own "where was I" state, usually as an enum
//! field, since the scheduler only ever re-enters them through `advance`.
//!
//! ```
//! use elvis_procsim::process::*;
//! use std::any::Any;
//!
//! /// Counts every frame the device receives.
//! #[derive(Default)]
//! struct Counter {
//!     seen: usize,
//! }
//!
//! impl Process for Counter {
//!     fn kind(&self) -> ProcessKind {
//!         ProcessKind::Other("counter")
//!     }
//!
//!     fn advance(&mut self, wake: Wake, _cx: &mut Context<'_>) -> Result<Step, ProcessError> {
//!         self.seen += wake.into_packets().len();
//!         Ok(Step::Wait(WaitCondition::packets(|_| true)))
//!     }
//!
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//!
//!     fn as_any_mut(&mut self) -> &mut dyn Any {
//!         self
//!     }
//! }
//! ```

mod wait;
pub use wait::{PacketPredicate, StatePredicate, Timeout, WaitCondition};

use crate::{
    clock::{Clock, Time},
    device::DeviceState,
    link::{LinkError, PortId, Received},
    packet::{Endpoint, Ipv4Address, Packet},
    protocols::sockets::SocketError,
    scheduler::{ProcessTable, SchedulerError},
};
use std::{
    any::Any,
    fmt::{self, Display},
};
use thiserror::Error as ThisError;

/// The scheduling pool a process belongs to. The two pools are independent,
/// so that protocol machinery running in kernelmode cannot be killed by
/// commands that only reach usermode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    User,
    Kernel,
}

impl Mode {
    /// Both modes, in the order the scheduler ticks them.
    pub const ALL: [Mode; 2] = [Mode::User, Mode::Kernel];
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::User => write!(f, "usermode"),
            Mode::Kernel => write!(f, "kernelmode"),
        }
    }
}

/// A process identifier, unique within one mode of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// Reserved for the init process every device runs.
    pub const INIT: Pid = Pid(1);
}

impl Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of process types, used to look processes up by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Init,
    Tcp,
    SpanningTree,
    Switch,
    /// Anything else, named for diagnostics
    Other(&'static str),
}

/// Why a process is being resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// First run after the process was started.
    Started,
    /// The packets that matched the process's packet predicate this tick.
    Packets(Vec<Received>),
    /// The process's state predicate held.
    Ready,
    /// The wait condition's timeout elapsed before anything else happened.
    TimedOut,
}

impl Wake {
    /// The matched packets, or nothing if the process was not woken by
    /// packets.
    pub fn into_packets(self) -> Vec<Received> {
        match self {
            Wake::Packets(packets) => packets,
            _ => Vec::new(),
        }
    }
}

/// What a process wants after an [`advance`](Process::advance).
#[derive(Debug)]
pub enum Step {
    /// Suspend until the condition is satisfied.
    Wait(WaitCondition),
    /// The process is finished and should be dropped.
    Exit,
}

/// A schedulable unit of protocol logic.
pub trait Process: Any {
    /// The type of the process, used by
    /// [`is_running`](crate::ProcessScheduler::is_running) and friends.
    fn kind(&self) -> ProcessKind;

    /// Runs the process from its last suspension point.
    ///
    /// Side effects such as sending packets happen synchronously through
    /// `cx`. An implementation must never loop waiting for something only the
    /// scheduler can observe; it should return a [`WaitCondition`] instead.
    /// Returning an error terminates the process, but does not undo anything
    /// it already did.
    fn advance(&mut self, wake: Wake, cx: &mut Context<'_>) -> Result<Step, ProcessError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Process {
    /// Gets the concrete process, if it is a `T`.
    pub fn downcast_ref<T: Process>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Process>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Connection to {0} was reset during the handshake")]
    ResetDuringHandshake(Endpoint),
    #[error("Handshake with {remote} gave up after {attempts} attempts")]
    HandshakeTimedOut { remote: Endpoint, attempts: u32 },
    #[error("No neighbor entry for {0}")]
    NoNeighbor(Ipv4Address),
    #[error("Protocol violation: {0}")]
    Protocol(String),
    #[error("{0}")]
    Link(#[from] LinkError),
    #[error("{0}")]
    Socket(#[from] SocketError),
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),
}

/// Everything a process may touch while it runs.
///
/// Device-owned tables are shared between all processes of a device. They
/// are only ever borrowed by the one process that is currently running.
pub struct Context<'a> {
    pid: Pid,
    mode: Mode,
    kind: ProcessKind,
    device: &'a mut DeviceState,
    table: &'a mut ProcessTable,
    terminated_self: bool,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        pid: Pid,
        mode: Mode,
        kind: ProcessKind,
        device: &'a mut DeviceState,
        table: &'a mut ProcessTable,
    ) -> Self {
        Self {
            pid,
            mode,
            kind,
            device,
            table,
            terminated_self: false,
        }
    }

    /// The pid of the running process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The mode of the running process.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn now(&self) -> Time {
        self.device.clock().now()
    }

    pub fn clock(&self) -> &Clock {
        self.device.clock()
    }

    pub fn device(&self) -> &DeviceState {
        self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceState {
        self.device
    }

    /// Sends a packet out of the given port. See
    /// [`Ports::send`](crate::link::Ports::send).
    pub fn send(&mut self, port: PortId, packet: Packet) -> bool {
        self.device.ports_mut().send(port, packet)
    }

    /// Starts another process on this device. It first runs during the next
    /// tick.
    pub fn start(&mut self, mode: Mode, process: impl Process) -> Pid {
        self.table.start(mode, Box::new(process))
    }

    /// Terminates a process. A process may terminate itself, in which case it
    /// is dropped as soon as the current `advance` returns.
    pub fn terminate(&mut self, pid: Pid, mode: Mode) -> Result<(), SchedulerError> {
        if pid == self.pid && mode == self.mode {
            self.terminated_self = true;
            return Ok(());
        }
        self.table.terminate(pid, mode)
    }

    /// Whether a process of the given kind exists, counting the running one.
    pub fn is_running(&self, kind: ProcessKind, mode: Option<Mode>) -> bool {
        let me = self.kind == kind && mode.map_or(true, |mode| mode == self.mode);
        me || self.table.is_running(kind, mode)
    }

    pub(crate) fn terminated_self(&self) -> bool {
        self.terminated_self
    }
}
