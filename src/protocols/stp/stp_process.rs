use super::{Bpdu, BridgeId};
use crate::{
    clock::Time,
    link::{PortId, Received},
    logging::bridge_event,
    packet::{EthernetHeader, MacAddress, Packet},
    process::{Context, Process, ProcessError, ProcessKind, Step, Timeout, WaitCondition, Wake},
};
use std::{any::Any, cmp::Ordering, collections::BTreeMap, time::Duration};

/// Timers and priority for one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StpConfig {
    pub priority: u16,
    /// How often BPDUs are flooded while the tree is settling
    pub send_interval: Duration,
    /// How often BPDUs are flooded once the tree is stable
    pub stable_send_interval: Duration,
    /// How long a port may stay silent before its record is dropped
    pub port_timeout: Duration,
    /// How long the root must go unchanged before the tree is stable
    pub stabilization: Duration,
    /// The maximum age this bridge advertises while it is root
    pub max_age: Duration,
}

impl Default for StpConfig {
    fn default() -> Self {
        Self {
            priority: BridgeId::DEFAULT_PRIORITY,
            send_interval: Duration::from_secs(2),
            stable_send_interval: Duration::from_secs(6),
            port_timeout: Duration::from_secs(20),
            stabilization: Duration::from_secs(10),
            max_age: Duration::from_secs(20),
        }
    }
}

impl StpConfig {
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }
}

/// The role of one port in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortState {
    #[default]
    NoState,
    /// The port with the shortest path to the root
    Root,
    /// This bridge serves the segment behind the port
    Designated,
    /// Another bridge serves the segment better, so the port carries only
    /// spanning tree frames
    Blocked,
}

/// What a bridge knows about one of its ports. Ports only get a record once
/// a BPDU arrives on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRecord {
    pub state: PortState,
    /// This bridge's distance to the root through the port. `None` when the
    /// bridge behind the port does not know of the current root.
    pub distance_to_root: Option<u32>,
    pub last_packet_time: Time,
    /// The bridge behind the port
    pub neighbor: BridgeId,
    /// The link cost of the port
    pub cost: u32,
}

/// Runs root election and port blocking for one bridge.
#[derive(Debug)]
pub struct SpanningTreeProcess {
    config: StpConfig,
    my_bid: BridgeId,
    root_bid: BridgeId,
    /// The age of the root's information as last received
    root_age: u32,
    root_max_age: Duration,
    root_refreshed: Time,
    last_root_change: Time,
    stable: bool,
    last_sent: Option<Time>,
    /// The best distance to the root over all ports
    distance: u32,
    ports: BTreeMap<PortId, PortRecord>,
}

impl SpanningTreeProcess {
    pub fn new(my_bid: BridgeId, config: StpConfig) -> Self {
        Self {
            my_bid,
            root_bid: my_bid,
            root_age: 0,
            root_max_age: config.max_age,
            root_refreshed: Time::ZERO,
            last_root_change: Time::ZERO,
            stable: false,
            last_sent: None,
            distance: 0,
            ports: BTreeMap::new(),
            config,
        }
    }

    pub fn my_bid(&self) -> BridgeId {
        self.my_bid
    }

    pub fn root_bid(&self) -> BridgeId {
        self.root_bid
    }

    pub fn is_root(&self) -> bool {
        self.root_bid == self.my_bid
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// This bridge's distance to the root, zero if it is the root.
    pub fn distance_to_root(&self) -> u32 {
        if self.is_root() {
            0
        } else {
            self.distance
        }
    }

    pub fn port(&self, port: PortId) -> Option<&PortRecord> {
        self.ports.get(&port)
    }

    pub fn ports(&self) -> &BTreeMap<PortId, PortRecord> {
        &self.ports
    }

    pub fn root_port(&self) -> Option<PortId> {
        self.ports
            .iter()
            .find(|(_, record)| record.state == PortState::Root)
            .map(|(port, _)| *port)
    }

    fn send_interval(&self) -> Duration {
        if self.stable {
            self.config.stable_send_interval
        } else {
            self.config.send_interval
        }
    }

    fn flood(&mut self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        let bpdu = if self.is_root() {
            Bpdu {
                bridge: self.my_bid,
                root: self.my_bid,
                distance: 0,
                age: 0,
                max_age: self.config.max_age,
            }
        } else {
            Bpdu {
                bridge: self.my_bid,
                root: self.root_bid,
                distance: self.distance,
                age: self.root_age + 1,
                max_age: self.root_max_age,
            }
        };
        let ports: Vec<_> = cx.device().ports().ids().collect();
        for port in ports {
            let src = cx.device().ports().interface(port)?.mac();
            let frame = Packet::new(EthernetHeader {
                src,
                dst: MacAddress::BRIDGE_GROUP,
            })
            .with(bpdu);
            cx.send(port, frame);
        }
        self.last_sent = Some(cx.now());
        Ok(())
    }

    /// Drops the records of ports that have gone quiet, unblocking them. When
    /// that leaves no path to the root, the bridge elects itself. Returns
    /// whether the root changed.
    fn evict_silent_ports(&mut self, now: Time, cx: &mut Context<'_>) -> Result<bool, ProcessError> {
        let timeout = self.config.port_timeout;
        let silent: Vec<_> = self
            .ports
            .iter()
            .filter(|(_, record)| now.saturating_since(record.last_packet_time) > timeout)
            .map(|(port, _)| *port)
            .collect();
        let evicted = !silent.is_empty();
        for port in silent {
            if let Some(record) = self.ports.remove(&port) {
                if record.state == PortState::Blocked {
                    cx.device_mut().ports_mut().unblock(port)?;
                }
                tracing::info!(device = %cx.device().name(), port = %port, "bridge port went silent");
            }
        }
        let stranded = evicted
            && !self.is_root()
            && self
                .ports
                .values()
                .all(|record| record.distance_to_root.is_none());
        if stranded {
            tracing::warn!(
                device = %cx.device().name(),
                root = %self.root_bid,
                "no path to the root left, electing self"
            );
            self.elect_self(now);
        }
        Ok(stranded)
    }

    /// Takes in one BPDU. Returns whether the root changed.
    fn bpdu_arrives(&mut self, port: PortId, bpdu: &Bpdu, cost: u32, now: Time) -> bool {
        if bpdu.bridge == self.my_bid {
            // Our own frame came back around a loop
            return false;
        }
        let record = self.ports.entry(port).or_insert(PortRecord {
            state: PortState::NoState,
            distance_to_root: None,
            last_packet_time: now,
            neighbor: bpdu.bridge,
            cost,
        });
        record.last_packet_time = now;
        record.neighbor = bpdu.bridge;
        record.cost = cost;
        let through = bpdu.distance.saturating_add(cost);

        match bpdu.root.cmp(&self.root_bid) {
            Ordering::Less => {
                for (other, record) in self.ports.iter_mut() {
                    record.distance_to_root = (*other == port).then_some(through);
                }
                self.root_bid = bpdu.root;
                self.root_age = bpdu.age;
                self.root_max_age = bpdu.max_age;
                self.root_refreshed = now;
                self.last_root_change = now;
                self.stable = false;
                true
            }
            Ordering::Equal => {
                record.distance_to_root = Some(through);
                // Only news from no further than our best path keeps the root
                // alive, so a dead root cannot be refreshed by bridges that
                // learned of it from us
                if !self.is_root() && through <= self.distance {
                    self.root_age = bpdu.age;
                    self.root_max_age = bpdu.max_age;
                    self.root_refreshed = now;
                }
                false
            }
            Ordering::Greater => {
                // A worse claim on the root port leaves the path in place
                // until the root's information expires
                if record.state != PortState::Root {
                    record.distance_to_root = None;
                }
                false
            }
        }
    }

    fn compute_port_states(&mut self) {
        for record in self.ports.values_mut() {
            if record.state == PortState::Root {
                record.state = PortState::NoState;
            }
        }

        let best = if self.is_root() {
            None
        } else {
            self.ports
                .iter()
                .filter_map(|(port, record)| {
                    record
                        .distance_to_root
                        .map(|distance| (distance, record.neighbor, *port))
                })
                .min()
        };
        let Some((distance, _, root_port)) = best else {
            if self.is_root() {
                self.distance = 0;
            }
            for record in self.ports.values_mut() {
                record.state = PortState::Designated;
            }
            return;
        };

        self.distance = distance;
        let me = (distance, self.my_bid);
        for (port, record) in self.ports.iter_mut() {
            record.state = if *port == root_port {
                PortState::Root
            } else {
                match record.distance_to_root {
                    None => PortState::Designated,
                    Some(through) => {
                        let advertised = through.saturating_sub(record.cost);
                        if (advertised, record.neighbor) > me {
                            PortState::Designated
                        } else {
                            PortState::Blocked
                        }
                    }
                }
            };
        }
    }

    fn apply_port_states(&self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        for (port, record) in self.ports.iter() {
            let blocked = cx.device().ports().interface(*port)?.is_blocked();
            match record.state {
                PortState::Blocked if !blocked => {
                    tracing::debug!(device = %cx.device().name(), port = %port, "blocking port");
                    cx.device_mut().ports_mut().block(*port)?;
                }
                PortState::Root | PortState::Designated | PortState::NoState if blocked => {
                    tracing::debug!(device = %cx.device().name(), port = %port, "unblocking port");
                    cx.device_mut().ports_mut().unblock(*port)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn elect_self(&mut self, now: Time) {
        self.root_bid = self.my_bid;
        self.root_age = 0;
        self.root_max_age = self.config.max_age;
        self.root_refreshed = now;
        self.last_root_change = now;
        self.stable = false;
        self.distance = 0;
        self.last_sent = None;
        for record in self.ports.values_mut() {
            record.distance_to_root = None;
        }
    }
}

impl Process for SpanningTreeProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::SpanningTree
    }

    fn advance(&mut self, wake: Wake, cx: &mut Context<'_>) -> Result<Step, ProcessError> {
        let now = cx.now();
        let mut root_changed = false;
        if matches!(wake, Wake::Started) {
            self.root_refreshed = now;
            self.last_root_change = now;
            root_changed = true;
        }

        let due = self
            .last_sent
            .map_or(true, |sent| now.saturating_since(sent) >= self.send_interval());
        if due {
            self.flood(cx)?;
        }

        root_changed |= self.evict_silent_ports(now, cx)?;

        for received in wake.into_packets() {
            let Some(bpdu) = received.packet.stp() else {
                continue;
            };
            let cost = cx.device().ports().interface(received.port)?.link_cost();
            root_changed |= self.bpdu_arrives(received.port, bpdu, cost, now);
        }

        let root_before = self.root_bid;
        self.compute_port_states();
        self.apply_port_states(cx)?;

        if !self.stable && now.saturating_since(self.last_root_change) >= self.config.stabilization {
            self.stable = true;
            tracing::info!(device = %cx.device().name(), root = %self.root_bid, "spanning tree stable");
        }

        if !self.is_root() && now.saturating_since(self.root_refreshed) > self.root_max_age {
            tracing::warn!(
                device = %cx.device().name(),
                root = %self.root_bid,
                "root information expired, electing self"
            );
            self.elect_self(now);
            self.compute_port_states();
            self.apply_port_states(cx)?;
            self.flood(cx)?;
        }

        if root_changed || self.root_bid != root_before {
            bridge_event(cx.device().name(), self.my_bid, self.root_bid, self.root_port());
        }

        Ok(Step::Wait(
            WaitCondition::packets(|received: &Received| received.packet.is_stp())
                .timeout(Timeout::next_tick(now)),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
