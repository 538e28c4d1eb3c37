//! A simulated computer or switch.
//!
//! A [`Device`] owns its interfaces, the tables its processes share
//! ([`DeviceState`]) and the [`ProcessScheduler`] that runs those processes.
//! Devices never talk to each other directly; the [`Internet`](crate::Internet)
//! moves frames between their interfaces and ticks each of them in turn.

use crate::{
    clock::{Clock, Time},
    link::{Interface, PortId, Ports},
    packet::{Endpoint, Ipv4Address, MacAddress, Packet},
    process::{Mode, Pid, Process, ProcessKind},
    protocols::{
        sockets::{SocketState, SocketTable},
        stp::{BridgeId, SpanningTreeProcess, StpConfig},
        tcp::{TcpConfig, TcpProcess},
        InitProcess, SocketId,
    },
    scheduler::{ProcessInfo, ProcessScheduler, SchedulerError},
};
use rustc_hash::FxHashMap;

/// Whether a device terminates traffic or forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Host,
    /// Switch interfaces are promiscuous, since they forward frames that are
    /// not addressed to them
    Switch,
}

/// Where to send frames for a directly reachable IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Neighbor {
    pub mac: MacAddress,
    pub port: PortId,
}

/// The parts of a device its processes share.
#[derive(Debug)]
pub struct DeviceState {
    name: String,
    mac: MacAddress,
    clock: Clock,
    ports: Ports,
    neighbors: FxHashMap<Ipv4Address, Neighbor>,
    sockets: SocketTable,
}

impl DeviceState {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device's own hardware address, which is also its bridge address.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    pub fn neighbor(&self, address: Ipv4Address) -> Option<Neighbor> {
        self.neighbors.get(&address).copied()
    }

    pub fn add_neighbor(&mut self, address: Ipv4Address, neighbor: Neighbor) {
        self.neighbors.insert(address, neighbor);
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut SocketTable {
        &mut self.sockets
    }
}

type Spawn = Box<dyn Fn() -> Box<dyn Process>>;

/// A networked device in the simulation.
pub struct Device {
    kind: DeviceKind,
    state: DeviceState,
    scheduler: ProcessScheduler,
    /// Processes to start every time the device powers on
    startup: Vec<(Mode, Spawn)>,
}

impl Device {
    /// Creates a powered-on device running only its init process.
    pub fn new(name: impl Into<String>, kind: DeviceKind, mac: MacAddress, clock: Clock) -> Self {
        let mut scheduler = ProcessScheduler::new();
        scheduler.start_init(InitProcess);
        Self {
            kind,
            state: DeviceState {
                name: name.into(),
                mac,
                clock,
                ports: Ports::new(),
                neighbors: Default::default(),
                sockets: SocketTable::new(),
            },
            scheduler,
            startup: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    pub fn ports(&self) -> &Ports {
        &self.state.ports
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.state.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut SocketTable {
        &mut self.state.sockets
    }

    pub fn scheduler(&self) -> &ProcessScheduler {
        &self.scheduler
    }

    pub fn add_interface(&mut self, interface: Interface) -> PortId {
        self.state.ports.add(interface)
    }

    /// Records that `address` is reachable at `mac` through `port`.
    pub fn add_neighbor(&mut self, address: Ipv4Address, mac: MacAddress, port: PortId) {
        self.state.add_neighbor(address, Neighbor { mac, port });
    }

    /// Registers a process to start every time the device powers on. If the
    /// device is on, one is started right away and its pid returned.
    pub fn on_startup<P: Process>(
        &mut self,
        mode: Mode,
        spawn: impl Fn() -> P + 'static,
    ) -> Option<Pid> {
        let spawn: Spawn = Box::new(move || -> Box<dyn Process> { Box::new(spawn()) });
        let pid = self
            .is_powered()
            .then(|| self.scheduler.start_boxed(mode, spawn()));
        self.startup.push((mode, spawn));
        pid
    }

    /// Runs one tick: polls the link layer, schedules processes, then reaps
    /// connections that have been idle for too long. Does nothing while the
    /// device is off.
    pub fn tick(&mut self) {
        if !self.is_powered() {
            return;
        }
        let received = self.state.ports.receive();
        self.scheduler.tick(&mut self.state, &received);
        self.reap_idle_connections();
    }

    /// Terminates the transport process behind every socket that has been
    /// quiet for longer than it allows, and returns those sockets.
    pub fn reap_idle_connections(&mut self) -> Vec<SocketId> {
        let now = self.state.now();
        let idle = self.state.sockets.idle(now);
        for id in idle.iter().copied() {
            let Ok(socket) = self.state.sockets.get_mut(id) else {
                continue;
            };
            tracing::info!(device = %self.state.name, socket = id.0, "reaping idle connection");
            socket.set_state(SocketState::Closed);
            if let Some((pid, mode)) = socket.owner() {
                socket.set_owner(None);
                match self.scheduler.terminate(pid, mode) {
                    Ok(()) => {}
                    // The process exited on its own earlier in this tick
                    Err(SchedulerError::NoSuchProcess { .. }) => {}
                }
            }
        }
        idle
    }

    pub fn is_powered(&self) -> bool {
        self.state.ports.is_powered()
    }

    /// Drops every process, socket and queued frame.
    pub fn power_off(&mut self) {
        tracing::info!(device = %self.state.name, "powering off");
        self.scheduler.clear();
        self.state.sockets.clear();
        self.state.ports.set_powered(false);
    }

    /// Starts init and the startup processes again.
    pub fn power_on(&mut self) {
        if self.is_powered() {
            return;
        }
        tracing::info!(device = %self.state.name, "powering on");
        self.state.ports.set_powered(true);
        self.scheduler.start_init(InitProcess);
        for (mode, spawn) in &self.startup {
            self.scheduler.start_boxed(*mode, spawn());
        }
    }

    pub fn start(&mut self, mode: Mode, process: impl Process) -> Pid {
        self.scheduler.start(mode, process)
    }

    pub fn terminate(&mut self, pid: Pid, mode: Mode) -> Result<(), SchedulerError> {
        self.scheduler.terminate(pid, mode)
    }

    pub fn is_running(&self, kind: ProcessKind, mode: Option<Mode>) -> bool {
        self.scheduler.is_running(kind, mode)
    }

    pub fn get(&self, pid: Pid, mode: Mode) -> Result<&dyn Process, SchedulerError> {
        self.scheduler.get(pid, mode)
    }

    /// Gets a process as its concrete type.
    pub fn get_as<T: Process>(&self, pid: Pid, mode: Mode) -> Option<&T> {
        self.scheduler.get(pid, mode).ok()?.downcast_ref()
    }

    pub fn get_as_mut<T: Process>(&mut self, pid: Pid, mode: Mode) -> Option<&mut T> {
        self.scheduler.get_mut(pid, mode).ok()?.downcast_mut()
    }

    pub fn list(&self, mode: Option<Mode>) -> Vec<ProcessInfo> {
        self.scheduler.list(mode)
    }

    pub fn find(&self, kind: ProcessKind, mode: Option<Mode>) -> Vec<ProcessInfo> {
        self.scheduler.find(kind, mode)
    }

    /// Opens a connection from `local` to `remote`. The transport process runs
    /// in kernelmode and owns the returned socket.
    pub fn connect_tcp(
        &mut self,
        local: Endpoint,
        remote: Endpoint,
        config: TcpConfig,
    ) -> (SocketId, Pid) {
        let socket = self
            .state
            .sockets
            .open(local, Some(remote), self.state.now(), config.max_idle);
        let pid = self.start(
            Mode::Kernel,
            TcpProcess::client(socket, local, remote, config),
        );
        self.own(socket, pid);
        (socket, pid)
    }

    /// Waits for one connection on `local`.
    pub fn listen_tcp(&mut self, local: Endpoint, config: TcpConfig) -> (SocketId, Pid) {
        let socket = self
            .state
            .sockets
            .open(local, None, self.state.now(), config.max_idle);
        let pid = self.start(Mode::Kernel, TcpProcess::server(socket, local, config));
        self.own(socket, pid);
        (socket, pid)
    }

    /// The bridge identifier this device would use with the given priority.
    pub fn bridge_id(&self, priority: u16) -> BridgeId {
        BridgeId::new(priority, self.state.mac)
    }

    /// Runs spanning tree in kernelmode, now and after every power cycle.
    pub fn start_spanning_tree(&mut self, config: StpConfig) -> Option<Pid> {
        let bridge = self.bridge_id(config.priority);
        self.on_startup(Mode::Kernel, move || {
            SpanningTreeProcess::new(bridge, config.clone())
        })
    }

    fn own(&mut self, socket: SocketId, pid: Pid) {
        if let Ok(socket) = self.state.sockets.get_mut(socket) {
            socket.set_owner(Some((pid, Mode::Kernel)));
        }
    }

    pub(crate) fn take_outgoing(&mut self, port: PortId) -> Vec<Packet> {
        self.state
            .ports
            .interface_mut(port)
            .map(Interface::take_outgoing)
            .unwrap_or_default()
    }

    /// Hands a frame from the wire to an interface. Frames reaching a device
    /// that is off are lost.
    pub(crate) fn deliver(&mut self, port: PortId, packet: Packet, now: Time) -> bool {
        if !self.is_powered() {
            return false;
        }
        self.state
            .ports
            .interface_mut(port)
            .map_or(false, |interface| interface.deliver(packet, port, now))
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("processes", &self.scheduler.list(None))
            .finish()
    }
}
