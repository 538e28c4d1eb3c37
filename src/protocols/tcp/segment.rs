use std::{
    fmt::{self, Display},
    ops::BitOr,
};

/// The number of bytes in a TCP header without options
const BASE_HEADER_OCTETS: usize = 20;
/// The number of bytes the maximum segment size option takes
const MSS_OPTION_OCTETS: usize = 4;
/// The number of bytes the selective acknowledgement option takes, not counting
/// its edges
const SACK_OPTION_OCTETS: usize = 2;
/// The number of bytes each selective acknowledgement edge takes
const SACK_EDGE_OCTETS: usize = 8;

/// The control bits of a TCP header
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Control(u8);

impl Control {
    /// There is no more data to send
    pub const FIN: Self = Self(1);
    /// Synchronize sequence numbers
    pub const SYN: Self = Self(1 << 1);
    /// Reset the connection
    pub const RST: Self = Self(1 << 2);
    /// The acknowledgment field is significant
    pub const ACK: Self = Self(1 << 4);

    /// Create a new Control with the given bits
    pub const fn new(ack: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(fin as u8 | (syn as u8) << 1 | (rst as u8) << 2 | (ack as u8) << 4)
    }

    /// Get whether the acknowledgment field significant
    pub const fn ack(self) -> bool {
        self.bit(4)
    }

    /// Get whether to reset the connection
    pub const fn rst(self) -> bool {
        self.bit(2)
    }

    /// Get whether to synchronize sequence numbers
    pub const fn syn(self) -> bool {
        self.bit(1)
    }

    /// Get whether there is no more data to send
    pub const fn fin(self) -> bool {
        self.bit(0)
    }

    /// Get the given bit
    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }
}

impl BitOr for Control {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

impl Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.syn(), "SYN"),
            (self.ack(), "ACK"),
            (self.fin(), "FIN"),
            (self.rst(), "RST"),
        ];
        let mut wrote = false;
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if wrote {
                write!(f, "|")?;
            }
            wrote = true;
            write!(f, "{name}")?;
        }
        if !wrote {
            write!(f, "-")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Control({self})")
    }
}

/// A contiguous block of sequence space the receiver holds beyond its
/// acknowledgement number. `left` is inclusive and `right` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SackEdge {
    pub left: u32,
    pub right: u32,
}

impl SackEdge {
    pub fn new(left: u32, right: u32) -> Self {
        Self { left, right }
    }

    pub fn len(self) -> u32 {
        self.right.wrapping_sub(self.left)
    }

    pub fn is_empty(self) -> bool {
        self.left == self.right
    }
}

/// A TCP segment as carried in a [`Packet`](crate::Packet).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpSegment {
    /// The source port number
    pub src_port: u16,
    /// The destination port number
    pub dst_port: u16,
    /// The sequence number of the first data octet in this segment (except when
    /// SYN is present). If SYN is present the sequence number is the initial
    /// sequence number (ISN) and the first data octet is ISN+1.
    pub seq: u32,
    /// If the ACK control bit is set this field contains the value of the next
    /// sequence number the sender of the segment is expecting to receive.
    pub ack: u32,
    /// Flags that adjust the how segments are handled
    pub ctl: Control,
    /// The number of segments the sender is willing to accept
    pub window: u16,
    /// The largest payload the sender is willing to accept. Only offered on
    /// connection requests.
    pub mss: Option<u16>,
    /// Blocks received beyond `ack`
    pub sack: Vec<SackEdge>,
    /// Set on resent data and on acknowledgements of duplicates
    pub retransmission: bool,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, ctl: Control) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            ctl,
            window: 0,
            mss: None,
            sack: Vec::new(),
            retransmission: false,
            payload: Vec::new(),
        }
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn mss(mut self, mss: u16) -> Self {
        self.mss = Some(mss);
        self
    }

    pub fn sack(mut self, sack: Vec<SackEdge>) -> Self {
        self.sack = sack;
        self
    }

    pub fn retransmission(mut self, retransmission: bool) -> Self {
        self.retransmission = retransmission;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// The length of the segment data, including any control bits
    pub fn seg_len(&self) -> u32 {
        self.payload.len() as u32 + self.ctl.syn() as u32 + self.ctl.fin() as u32
    }

    /// The number of bytes the segment would take in a frame.
    pub(crate) fn size(&self) -> usize {
        let mss = self.mss.map_or(0, |_| MSS_OPTION_OCTETS);
        let sack = if self.sack.is_empty() {
            0
        } else {
            SACK_OPTION_OCTETS + SACK_EDGE_OCTETS * self.sack.len()
        };
        BASE_HEADER_OCTETS + mss + sack + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_works() {
        let control = Control::SYN | Control::ACK;
        assert!(control.syn());
        assert!(control.ack());
        assert!(!control.fin());
        assert!(!control.rst());
        assert_eq!(control, Control::new(true, false, true, false));
        assert_eq!(u8::from(control), 0b1_0010);
        assert_eq!(control.to_string(), "SYN|ACK");
        assert_eq!(Control::default().to_string(), "-");
    }

    #[test]
    fn seg_len_counts_control_bits() {
        let syn = TcpSegment::new(1, 2, 0, 0, Control::SYN);
        assert_eq!(syn.seg_len(), 1);
        let data = TcpSegment::new(1, 2, 1, 1, Control::ACK | Control::FIN).payload(vec![0; 10]);
        assert_eq!(data.seg_len(), 11);
        let ack = TcpSegment::new(1, 2, 1, 1, Control::ACK);
        assert_eq!(ack.seg_len(), 0);
    }

    #[test]
    fn size_counts_options() {
        let segment = TcpSegment::new(1, 2, 0, 0, Control::SYN).mss(1460);
        assert_eq!(segment.size(), 24);
        let segment = TcpSegment::new(1, 2, 0, 0, Control::ACK)
            .sack(vec![SackEdge::new(5, 10), SackEdge::new(20, 30)])
            .payload(vec![0; 3]);
        assert_eq!(segment.size(), 20 + 2 + 16 + 3);
    }
}
