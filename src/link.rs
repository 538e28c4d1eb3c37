//! The link layer of a device: its interfaces and the frames queued on them.
//!
//! Processes only ever see the link layer through [`Ports`]. Frames a process
//! sends are queued on the interface's outbox until the
//! [`Internet`](crate::Internet) carries them across a
//! [`Wire`](crate::networks::Wire) and drops them in the peer's inbox.

use crate::{
    clock::Time,
    packet::{MacAddress, Packet},
};
use std::{
    collections::VecDeque,
    fmt::{self, Display},
};
use thiserror::Error as ThisError;

/// The cost of crossing a link, as used by spanning tree distance calculations.
pub const DEFAULT_LINK_COST: u32 = 10;

/// Identifies one interface of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub usize);

impl Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eth{}", self.0)
    }
}

/// A packet handed to the device by the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub packet: Packet,
    /// The interface the packet arrived on
    pub port: PortId,
    /// When the packet arrived
    pub time: Time,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("No interface {0} on this device")]
    NoSuchInterface(PortId),
}

/// One network interface.
#[derive(Debug, Clone)]
pub struct Interface {
    name: String,
    mac: MacAddress,
    mtu: Option<usize>,
    cost: u32,
    promiscuous: bool,
    blocked: bool,
    inbox: VecDeque<Received>,
    outbox: VecDeque<Packet>,
}

impl Interface {
    /// Creates an interface that only accepts frames addressed to `mac`.
    pub fn new(name: impl Into<String>, mac: MacAddress) -> Self {
        Self {
            name: name.into(),
            mac,
            mtu: None,
            cost: DEFAULT_LINK_COST,
            promiscuous: false,
            blocked: false,
            inbox: Default::default(),
            outbox: Default::default(),
        }
    }

    /// Limits the size of frames the interface will carry.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Sets the link cost spanning tree adds when a frame arrives here.
    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Makes the interface accept every frame regardless of destination, as
    /// switch ports do.
    pub fn promiscuous(mut self) -> Self {
        self.promiscuous = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn link_cost(&self) -> u32 {
        self.cost
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Queues a frame arriving from the wire, applying block and promiscuity
    /// filtering. Returns whether the frame was accepted.
    pub(crate) fn deliver(&mut self, packet: Packet, port: PortId, time: Time) -> bool {
        if self.blocked && !packet.is_stp() {
            return false;
        }
        if !self.promiscuous {
            match packet.destination() {
                Some(dst) if dst == self.mac || dst.is_multicast() => {}
                _ => return false,
            }
        }
        self.inbox.push_back(Received { packet, port, time });
        true
    }

    /// Queues a frame for transmission. Returns false if the frame was
    /// dropped.
    fn transmit(&mut self, packet: Packet) -> bool {
        if self.blocked && !packet.is_stp() {
            return false;
        }
        if let Some(mtu) = self.mtu {
            if packet.size() > mtu {
                tracing::warn!(
                    interface = %self.name,
                    size = packet.size(),
                    mtu,
                    "dropping frame larger than the MTU"
                );
                return false;
            }
        }
        self.outbox.push_back(packet);
        true
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<Packet> {
        self.outbox.drain(..).collect()
    }

    fn clear(&mut self) {
        self.inbox.clear();
        self.outbox.clear();
        self.blocked = false;
    }
}

/// All interfaces of one device.
#[derive(Debug, Clone)]
pub struct Ports {
    interfaces: Vec<Interface>,
    powered: bool,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            powered: true,
        }
    }
}

impl Ports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface and returns the port it was assigned.
    pub fn add(&mut self, interface: Interface) -> PortId {
        self.interfaces.push(interface);
        PortId(self.interfaces.len() - 1)
    }

    /// Sends a frame out of the given port. Returns false if the frame was
    /// dropped: the device is off, the port does not exist or is blocked, or
    /// the frame exceeds the MTU.
    pub fn send(&mut self, port: PortId, packet: Packet) -> bool {
        if !self.powered {
            return false;
        }
        match self.interfaces.get_mut(port.0) {
            Some(interface) => interface.transmit(packet),
            None => false,
        }
    }

    /// Sends a copy of the frame out of every port except `except`. Returns
    /// how many copies were accepted.
    pub fn flood(&mut self, packet: &Packet, except: Option<PortId>) -> usize {
        let ports: Vec<_> = self.ids().filter(|port| Some(*port) != except).collect();
        ports
            .into_iter()
            .filter(|port| self.send(*port, packet.clone()))
            .count()
    }

    /// Takes every frame that arrived since the previous call.
    pub fn receive(&mut self) -> Vec<Received> {
        if !self.powered {
            return Vec::new();
        }
        let mut received: Vec<_> = self
            .interfaces
            .iter_mut()
            .flat_map(|interface| interface.inbox.drain(..))
            .collect();
        received.sort_by_key(|r| r.time);
        received
    }

    /// Stops the port from carrying anything but spanning tree frames.
    pub fn block(&mut self, port: PortId) -> Result<(), LinkError> {
        self.interface_mut(port)?.blocked = true;
        Ok(())
    }

    pub fn unblock(&mut self, port: PortId) -> Result<(), LinkError> {
        self.interface_mut(port)?.blocked = false;
        Ok(())
    }

    pub fn interface(&self, port: PortId) -> Result<&Interface, LinkError> {
        self.interfaces
            .get(port.0)
            .ok_or(LinkError::NoSuchInterface(port))
    }

    pub(crate) fn interface_mut(&mut self, port: PortId) -> Result<&mut Interface, LinkError> {
        self.interfaces
            .get_mut(port.0)
            .ok_or(LinkError::NoSuchInterface(port))
    }

    pub fn ids(&self) -> impl Iterator<Item = PortId> {
        (0..self.interfaces.len()).map(PortId)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Turns the link layer on or off. Turning it off discards every queued
    /// frame and unblocks every port.
    pub(crate) fn set_powered(&mut self, powered: bool) {
        self.powered = powered;
        if !powered {
            self.interfaces.iter_mut().for_each(Interface::clear);
        }
    }
}
