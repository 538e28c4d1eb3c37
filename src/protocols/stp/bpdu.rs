use super::BridgeId;
use std::time::Duration;

/// A bridge protocol data unit: one bridge's view of the spanning tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bpdu {
    /// The bridge that sent this frame
    pub bridge: BridgeId,
    /// The root the sender believes in
    pub root: BridgeId,
    /// The sender's path cost to the root
    pub distance: u32,
    /// How many bridges the root's information has passed through
    pub age: u32,
    /// How long the root's information may go unrefreshed before it is
    /// discarded
    pub max_age: Duration,
}

impl Bpdu {
    /// The size of a configuration BPDU on the wire.
    pub const OCTETS: usize = 35;
}
