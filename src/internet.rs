use crate::{
    clock::{Clock, Time},
    device::{Device, DeviceKind},
    link::{Interface, PortId},
    networks::{Attachment, Wire},
    packet::MacAddress,
    process::Mode,
    protocols::SwitchProcess,
    shutdown::{ExitStatus, Shutdown},
};
use std::{
    fmt::{self, Display},
    time::Duration,
};
use tokio::time::MissedTickBehavior;

/// The first hardware address handed out. The locally administered bit is
/// set so generated addresses never collide with real vendor prefixes.
const FIRST_MAC: u64 = 0x02_00_00_00_00_01;

/// Identifies a [`Device`] within one [`Internet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}", self.0)
    }
}

/// A simulated internetwork: a set of devices, the wires between them and
/// the clock they share.
///
/// ```
/// use elvis_procsim::{Internet, process::{Mode, ProcessKind}};
///
/// let mut internet = Internet::new();
/// let a = internet.add_host("a");
/// let b = internet.add_switch("b");
/// internet.link(a, b);
///
/// assert!(internet.run_ticks(3) == 3);
/// assert!(internet.device(b).is_running(ProcessKind::Switch, Some(Mode::Kernel)));
/// ```
pub struct Internet {
    clock: Clock,
    devices: Vec<Device>,
    wires: Vec<Wire>,
    tick_period: Duration,
    next_mac: u64,
    ticks: u64,
}

impl Internet {
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            devices: Vec::new(),
            wires: Vec::new(),
            tick_period: Duration::from_millis(10),
            next_mac: FIRST_MAC,
            ticks: 0,
        }
    }

    /// Sets how far the clock moves on every tick.
    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// How many ticks have run.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Adds an end host.
    pub fn add_host(&mut self, name: impl Into<String>) -> DeviceId {
        self.add_device(name, DeviceKind::Host)
    }

    /// Adds a switch. It forwards frames between its ports on every power
    /// cycle, but only runs spanning tree once
    /// [`start_spanning_tree`](Device::start_spanning_tree) is called.
    pub fn add_switch(&mut self, name: impl Into<String>) -> DeviceId {
        let id = self.add_device(name, DeviceKind::Switch);
        self.device_mut(id)
            .on_startup(Mode::Kernel, SwitchProcess::new);
        id
    }

    fn add_device(&mut self, name: impl Into<String>, kind: DeviceKind) -> DeviceId {
        let mac = self.allocate_mac();
        let device = Device::new(name, kind, mac, self.clock.clone());
        tracing::debug!(device = device.name(), kind = ?kind, mac = %mac, "device created");
        self.devices.push(device);
        DeviceId(self.devices.len() - 1)
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this internet.
    pub fn device(&self, id: DeviceId) -> &Device {
        &self.devices[id.0]
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this internet.
    pub fn device_mut(&mut self, id: DeviceId) -> &mut Device {
        &mut self.devices[id.0]
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.devices
            .iter()
            .enumerate()
            .map(|(index, device)| (DeviceId(index), device))
    }

    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    /// Gives each device a new interface and connects them with a lossless
    /// wire. Returns the new ports.
    pub fn link(&mut self, a: DeviceId, b: DeviceId) -> (PortId, PortId) {
        let (port_a, port_b) = self.add_ports(a, b);
        self.add_wire(Wire::new(
            Attachment { device: a, port: port_a },
            Attachment { device: b, port: port_b },
        ));
        (port_a, port_b)
    }

    /// Like [`link`](Self::link), but the wire drops each frame with
    /// probability `rate`.
    pub fn link_lossy(&mut self, a: DeviceId, b: DeviceId, rate: f64, seed: u64) -> (PortId, PortId) {
        let (port_a, port_b) = self.add_ports(a, b);
        self.add_wire(
            Wire::new(
                Attachment { device: a, port: port_a },
                Attachment { device: b, port: port_b },
            )
            .loss_rate(rate, seed),
        );
        (port_a, port_b)
    }

    /// Connects two existing ports.
    pub fn add_wire(&mut self, wire: Wire) {
        self.wires.push(wire);
    }

    /// The hardware address of a port.
    pub fn mac(&self, device: DeviceId, port: PortId) -> Option<MacAddress> {
        self.devices
            .get(device.0)?
            .ports()
            .interface(port)
            .ok()
            .map(Interface::mac)
    }

    fn add_ports(&mut self, a: DeviceId, b: DeviceId) -> (PortId, PortId) {
        (self.add_port(a), self.add_port(b))
    }

    fn add_port(&mut self, id: DeviceId) -> PortId {
        let mac = self.allocate_mac();
        let device = self.device_mut(id);
        let name = format!("eth{}", device.ports().len());
        let interface = match device.kind() {
            DeviceKind::Host => Interface::new(name, mac),
            DeviceKind::Switch => Interface::new(name, mac).promiscuous(),
        };
        device.add_interface(interface)
    }

    fn allocate_mac(&mut self) -> MacAddress {
        let mac = MacAddress::from(self.next_mac);
        self.next_mac += 1;
        mac
    }

    /// Runs one tick: advances the clock, carries queued frames across every
    /// wire, then ticks every device in the order it was added. Returns false
    /// and does nothing while the clock is paused.
    pub fn tick(&mut self) -> bool {
        if !self.clock.advance(self.tick_period) {
            return false;
        }
        let now = self.clock.now();
        for wire in self.wires.iter_mut() {
            wire.transfer(&mut self.devices, now);
        }
        for device in self.devices.iter_mut() {
            device.tick();
        }
        self.ticks += 1;
        true
    }

    /// Runs up to `ticks` ticks and returns how many actually ran.
    pub fn run_ticks(&mut self, ticks: u64) -> u64 {
        let mut ran = 0;
        for _ in 0..ticks {
            if !self.tick() {
                break;
            }
            ran += 1;
        }
        ran
    }

    /// Ticks until `done` holds, checking before every tick. Gives up after
    /// `max_ticks` and returns whether `done` was reached.
    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            if !self.tick() {
                return false;
            }
        }
        done(self)
    }

    /// Ticks once per tick period of real time until `shutdown` is
    /// triggered.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> ExitStatus {
        let mut interval = tokio::time::interval(self.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(devices = self.devices.len(), wires = self.wires.len(), "simulation started");
        let status = loop {
            tokio::select! {
                status = shutdown.wait_for_shutdown() => break status,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        };
        tracing::info!(ticks = self.ticks, status = ?status, "simulation stopped");
        status
    }
}

impl Default for Internet {
    fn default() -> Self {
        Self::new()
    }
}
