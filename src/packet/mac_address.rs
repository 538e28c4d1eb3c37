use std::fmt::{self, Display};

/// A link-layer address.
///
/// Bridges use it, together with a priority, to order themselves during root
/// election, so the derived ordering is significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-ones broadcast address.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// The bridge group address spanning tree frames are sent to.
    pub const BRIDGE_GROUP: Self = Self([0x01, 0x80, 0xc2, 0x00, 0x00, 0x00]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Whether frames sent to this address are meant for more than one
    /// receiver. Broadcast counts as multicast.
    pub fn is_multicast(self) -> bool {
        self.0[0] & 0x01 == 0x01
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn to_bytes(self) -> [u8; 6] {
        self.0
    }
}

impl From<u64> for MacAddress {
    /// Uses the low 48 bits of `n`.
    fn from(n: u64) -> Self {
        let bytes = n.to_be_bytes();
        Self([bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
