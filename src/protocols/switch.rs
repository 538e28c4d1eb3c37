use crate::{
    clock::Time,
    link::{PortId, Received},
    packet::MacAddress,
    process::{Context, Process, ProcessError, ProcessKind, Step, WaitCondition, Wake},
};
use rustc_hash::FxHashMap;
use std::{any::Any, time::Duration};

/// How long a learned address is trusted without hearing from it again.
const DEFAULT_AGING: Duration = Duration::from_secs(300);

/// A learning bridge.
///
/// Remembers the port each source address was last seen on and forwards
/// frames for known addresses out of that port alone. Frames for unknown or
/// group addresses are flooded. Spanning tree frames are left to the
/// [`SpanningTreeProcess`](super::SpanningTreeProcess), and blocked ports are
/// skipped by the link layer itself.
#[derive(Debug, Clone)]
pub struct SwitchProcess {
    table: FxHashMap<MacAddress, (PortId, Time)>,
    aging: Duration,
}

impl SwitchProcess {
    pub fn new() -> Self {
        Self::with_aging(DEFAULT_AGING)
    }

    pub fn with_aging(aging: Duration) -> Self {
        Self {
            table: Default::default(),
            aging,
        }
    }

    /// The port frames for `mac` are forwarded to, if it has been learned.
    pub fn lookup(&self, mac: MacAddress, now: Time) -> Option<PortId> {
        self.table
            .get(&mac)
            .filter(|(_, seen)| now.saturating_since(*seen) <= self.aging)
            .map(|(port, _)| *port)
    }

    /// Number of addresses currently learned.
    pub fn learned(&self) -> usize {
        self.table.len()
    }

    /// Forgets addresses that have aged out or sit behind a port the spanning
    /// tree has since blocked.
    fn prune(&mut self, now: Time, cx: &Context<'_>) {
        let aging = self.aging;
        let ports = cx.device().ports();
        self.table.retain(|_, (port, seen)| {
            now.saturating_since(*seen) <= aging
                && ports
                    .interface(*port)
                    .is_ok_and(|interface| !interface.is_blocked())
        });
    }

    fn forward(&mut self, received: Received, cx: &mut Context<'_>) {
        let Some(ethernet) = received.packet.ethernet().copied() else {
            return;
        };
        let now = cx.now();
        self.prune(now, cx);
        if !ethernet.src.is_multicast() {
            self.table.insert(ethernet.src, (received.port, now));
        }

        let known = if ethernet.dst.is_multicast() {
            None
        } else {
            self.lookup(ethernet.dst, now)
        };
        match known {
            // The destination is on the segment the frame came from
            Some(port) if port == received.port => {}
            Some(port) => {
                cx.send(port, received.packet);
            }
            None => {
                cx.device_mut()
                    .ports_mut()
                    .flood(&received.packet, Some(received.port));
            }
        }
    }
}

impl Default for SwitchProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl Process for SwitchProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Switch
    }

    fn advance(&mut self, wake: Wake, cx: &mut Context<'_>) -> Result<Step, ProcessError> {
        for received in wake.into_packets() {
            self.forward(received, cx);
        }
        Ok(Step::Wait(WaitCondition::packets(|received: &Received| {
            !received.packet.is_stp()
        })))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
