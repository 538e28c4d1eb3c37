//! A tick-driven simulator for the control logic of a small internetwork.
//!
//! End hosts, switches and routers are modelled as [`Device`]s. Each device
//! runs a set of independent [`Process`]es which exchange simulated link-layer
//! [`Packet`]s. Processes never block: every time a process needs to wait for
//! something it hands a [`WaitCondition`] back to the device's
//! [`ProcessScheduler`], which resumes it during a later tick once a matching
//! packet arrives, a predicate becomes true, or a timeout elapses.
//!
//! # Organization
//! - [`Clock`] is the pausable virtual clock every timer is measured against
//! - [`Packet`] and the [`link`] module model frames and interfaces
//! - [`Process`] and [`ProcessScheduler`] implement cooperative scheduling
//! - [`protocols`] contains the processes built on the scheduler: a reliable
//!   byte-stream transport ([`protocols::tcp`]), a spanning tree election
//!   ([`protocols::stp`]) and a learning switch ([`protocols::switch`])
//! - [`Internet`] wires devices together and drives the simulation
//!
//! # Determinism
//!
//! There is no real concurrency anywhere in the crate. Within one tick the
//! scheduler resolves processes in a fixed order, so two runs of the same
//! simulation produce the same packets in the same order.

pub mod logging;

pub mod clock;
pub use clock::{Clock, Time};

pub mod packet;
pub use packet::Packet;

pub mod link;

pub mod networks;

pub mod process;
pub use process::{Process, WaitCondition};

pub mod scheduler;
pub use scheduler::ProcessScheduler;

pub mod device;
pub use device::Device;

pub mod protocols;

mod internet;
pub use internet::{DeviceId, Internet};

pub mod shutdown;
pub use shutdown::{ExitStatus, Shutdown};
