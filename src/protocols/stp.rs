//! Spanning tree election between switches.
//!
//! Every switch floods a [`Bpdu`] out of each port at a fixed interval,
//! advertising the root it believes in and its distance to that root. Each
//! switch adopts the lowest [`BridgeId`] it hears of as the root, picks the
//! port with the shortest path to it as its root port, and blocks every port
//! that another bridge serves better. Blocked ports carry nothing but
//! spanning tree frames, which leaves a loop-free tree.
//!
//! Once the root has gone unchanged for a while the tree is considered
//! stable and BPDUs are sent less often.

mod bridge_id;
pub use bridge_id::BridgeId;

mod bpdu;
pub use bpdu::Bpdu;

mod stp_process;
pub use stp_process::{PortRecord, PortState, SpanningTreeProcess, StpConfig};

#[cfg(test)]
mod tests;
