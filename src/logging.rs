//! Logging holds wrapper functions for logging events.
//!
//! Each function corresponds to a type of event (process lifecycle, segments,
//! bridge decisions). They are called from inside the scheduler and the core
//! protocols so that every log line for a given event carries the same
//! fields.

use crate::{
    link::PortId,
    process::{Mode, Pid, ProcessKind},
    protocols::{stp::BridgeId, tcp::TcpSegment},
};
use std::{
    fs::{create_dir_all, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};
use tracing::{event, Level};
use tracing_subscriber::FmtSubscriber;

/// Initializes event logging. Should only be called once, when the
/// simulation starts.
///
/// Events are written as JSON lines to `debug-<timestamp>.log` inside `dir`,
/// which is created if it does not exist.
pub fn init_events(dir: impl AsRef<Path>) -> io::Result<()> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let file_path = dir.join(format!(
        "debug-{}.log",
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    ));
    let file = OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(file_path)?;
    let subscriber = FmtSubscriber::builder()
        .with_writer(Arc::new(file))
        .with_max_level(Level::TRACE)
        .json()
        .finish();
    // Set the global default so all events go to the same file
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// A process changed lifecycle state (started, exited, terminated).
pub fn process_event(pid: Pid, mode: Mode, kind: ProcessKind, what: &str) {
    event!(
        target: "PROCESS",
        Level::DEBUG,
        pid = pid.0,
        mode = %mode,
        kind = ?kind,
        what
    );
}

/// A TCP segment was handed to, or taken from, the link layer.
pub fn segment_event(device: &str, direction: &str, segment: &TcpSegment) {
    event!(
        target: "SEGMENT",
        Level::TRACE,
        device,
        direction,
        src_port = segment.src_port,
        dst_port = segment.dst_port,
        seq = segment.seq,
        ack = segment.ack,
        flags = %segment.ctl,
        len = segment.payload.len(),
        sack = segment.sack.len(),
        retransmission = segment.retransmission,
    );
}

/// A bridge changed its view of the spanning tree.
pub fn bridge_event(device: &str, bridge: BridgeId, root: BridgeId, root_port: Option<PortId>) {
    event!(
        target: "BRIDGE",
        Level::INFO,
        device,
        bridge = %bridge,
        root = %root,
        root_port = ?root_port,
    );
}
