//! The processes built on top of the scheduler.
//!
//! - [`init`]: the placeholder every device runs as usermode pid 1
//! - [`sockets`]: the per-device table applications use to talk to transport
//!   processes
//! - [`tcp`]: a reliable, ordered byte stream with selective acknowledgement
//! - [`stp`]: a spanning tree election that blocks redundant switch ports
//! - [`switch`]: a learning bridge that forwards frames between ports

pub mod init;
pub use init::InitProcess;

pub mod sockets;
pub use sockets::{SocketId, SocketTable};

pub mod tcp;
pub use tcp::TcpProcess;

pub mod stp;
pub use stp::SpanningTreeProcess;

pub mod switch;
pub use switch::SwitchProcess;
