use crate::packet::MacAddress;
use std::fmt::{self, Display};

/// Identifies a bridge during root election. Lower identifiers win: the
/// priority is compared first and the hardware address breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BridgeId {
    pub priority: u16,
    pub mac: MacAddress,
}

impl BridgeId {
    /// The priority bridges get unless configured otherwise.
    pub const DEFAULT_PRIORITY: u16 = 32768;

    pub const fn new(priority: u16, mac: MacAddress) -> Self {
        Self { priority, mac }
    }
}

impl Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.priority, self.mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_before_address() {
        let low_mac = BridgeId::new(32768, MacAddress::from(1u64));
        let high_mac = BridgeId::new(32768, MacAddress::from(2u64));
        let low_priority = BridgeId::new(4096, MacAddress::from(9u64));
        assert!(low_mac < high_mac);
        assert!(low_priority < low_mac);
        assert_eq!(low_priority.to_string(), "4096/00:00:00:00:00:09");
    }
}
