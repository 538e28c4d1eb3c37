//! Layered link-layer frames exchanged between processes.
//!
//! A [`Packet`] is a structured value rather than a byte buffer: each layer is
//! kept as a typed header and can be looked up by name, the way a packet
//! dissector would present it.
//!
//! ```
//! use elvis_procsim::packet::{EthernetHeader, Layer, MacAddress, Packet};
//!
//! let packet = Packet::new(EthernetHeader {
//!     src: MacAddress::from(1u64),
//!     dst: MacAddress::BROADCAST,
//! })
//! .with(Layer::Payload(b"hello".to_vec()));
//!
//! assert!(packet.layer("Payload").is_some());
//! assert!(matches!(packet["Ethernet"], Layer::Ethernet(_)));
//! ```

mod ipv4_address;
mod mac_address;

pub use ipv4_address::Ipv4Address;
pub use mac_address::MacAddress;

use crate::protocols::{stp::Bpdu, tcp::TcpSegment};
use std::{
    fmt::{self, Display},
    ops::Index,
};

/// Bytes of an Ethernet II header.
const ETHERNET_HEADER_OCTETS: usize = 14;
/// Bytes of an IPv4 header without options.
const IPV4_HEADER_OCTETS: usize = 20;

/// An address and port pair identifying one end of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    pub address: Ipv4Address,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Ipv4Address, port: u16) -> Self {
        Self { address, port }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthernetHeader {
    pub src: MacAddress,
    pub dst: MacAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Header {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub ttl: u8,
}

impl Ipv4Header {
    pub fn new(src: Ipv4Address, dst: Ipv4Address) -> Self {
        Self { src, dst, ttl: 64 }
    }
}

/// One layer of a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Ethernet(EthernetHeader),
    Ipv4(Ipv4Header),
    Tcp(TcpSegment),
    Stp(Bpdu),
    Payload(Vec<u8>),
}

impl Layer {
    /// The name the layer is addressed by.
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Ethernet(_) => "Ethernet",
            Layer::Ipv4(_) => "IPv4",
            Layer::Tcp(_) => "TCP",
            Layer::Stp(_) => "STP",
            Layer::Payload(_) => "Payload",
        }
    }

    fn size(&self) -> usize {
        match self {
            Layer::Ethernet(_) => ETHERNET_HEADER_OCTETS,
            Layer::Ipv4(_) => IPV4_HEADER_OCTETS,
            Layer::Tcp(segment) => segment.size(),
            Layer::Stp(_) => Bpdu::OCTETS,
            Layer::Payload(bytes) => bytes.len(),
        }
    }
}

impl From<EthernetHeader> for Layer {
    fn from(header: EthernetHeader) -> Self {
        Layer::Ethernet(header)
    }
}

impl From<Ipv4Header> for Layer {
    fn from(header: Ipv4Header) -> Self {
        Layer::Ipv4(header)
    }
}

impl From<TcpSegment> for Layer {
    fn from(segment: TcpSegment) -> Self {
        Layer::Tcp(segment)
    }
}

impl From<Bpdu> for Layer {
    fn from(bpdu: Bpdu) -> Self {
        Layer::Stp(bpdu)
    }
}

/// A simulated frame, made of an Ethernet header followed by any number of
/// upper layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    layers: Vec<Layer>,
}

impl Packet {
    /// Creates a frame containing only the link layer.
    pub fn new(ethernet: EthernetHeader) -> Self {
        Self {
            layers: vec![Layer::Ethernet(ethernet)],
        }
    }

    /// Appends a layer on top of the existing ones.
    pub fn with(mut self, layer: impl Into<Layer>) -> Self {
        self.layers.push(layer.into());
        self
    }

    /// Looks up the first layer with the given name.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name() == name)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn ethernet(&self) -> Option<&EthernetHeader> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Ethernet(header) => Some(header),
            _ => None,
        })
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Ipv4(header) => Some(header),
            _ => None,
        })
    }

    pub fn tcp(&self) -> Option<&TcpSegment> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Tcp(segment) => Some(segment),
            _ => None,
        })
    }

    pub fn stp(&self) -> Option<&Bpdu> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::Stp(bpdu) => Some(bpdu),
            _ => None,
        })
    }

    /// Whether this is a spanning tree control frame. These are the only
    /// frames that pass through blocked ports.
    pub fn is_stp(&self) -> bool {
        self.stp().is_some()
    }

    /// The destination MAC address, if the packet has a link layer.
    pub fn destination(&self) -> Option<MacAddress> {
        self.ethernet().map(|header| header.dst)
    }

    /// The approximate number of bytes the packet would occupy on the wire.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }
}

impl Index<&str> for Packet {
    type Output = Layer;

    /// # Panics
    ///
    /// Panics if the packet has no layer with the given name. Use
    /// [`Packet::layer`] for a fallible lookup.
    fn index(&self, name: &str) -> &Self::Output {
        match self.layer(name) {
            Some(layer) => layer,
            None => panic!("packet has no {name} layer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::tcp::{Control, TcpSegment};

    fn frame() -> Packet {
        Packet::new(EthernetHeader {
            src: MacAddress::from(1u64),
            dst: MacAddress::from(2u64),
        })
    }

    #[test]
    fn layers_are_addressable_by_name() {
        let segment = TcpSegment::new(5000, 80, 0, 0, Control::SYN);
        let packet = frame()
            .with(Ipv4Header::new([10, 0, 0, 1].into(), [10, 0, 0, 2].into()))
            .with(segment.clone());

        assert_eq!(packet["TCP"], Layer::Tcp(segment.clone()));
        assert_eq!(packet.tcp(), Some(&segment));
        assert!(packet.layer("STP").is_none());
        assert!(!packet.is_stp());
        assert_eq!(
            packet.ipv4().map(|header| header.dst),
            Some(Ipv4Address::new([10, 0, 0, 2]))
        );
    }

    #[test]
    #[should_panic(expected = "packet has no STP layer")]
    fn indexing_a_missing_layer_panics() {
        let _ = &frame()["STP"];
    }

    #[test]
    fn size_sums_layers() {
        let packet = frame().with(Layer::Payload(vec![0; 100]));
        assert_eq!(packet.size(), ETHERNET_HEADER_OCTETS + 100);
    }
}
