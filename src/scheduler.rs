//! The cooperative [`ProcessScheduler`] every device runs.
//!
//! Each tick the scheduler works through both modes, usermode first. Within a
//! mode it:
//!
//! 1. readies every process started since the last tick,
//! 2. readies every waiting process whose state predicate holds,
//! 3. offers every newly received packet to every waiting process with a
//!    packet predicate, readying a process at most once but collecting all of
//!    its matches if it aggregates,
//! 4. readies every waiting process whose timeout elapsed,
//! 5. advances each ready process exactly once, in the order it became ready.
//!
//! Only packets received strictly after the previous tick are considered, so
//! no packet is matched in two different ticks.

use crate::{
    clock::Time,
    device::DeviceState,
    link::Received,
    logging::process_event,
    process::{Context, Mode, Pid, Process, ProcessKind, Step, WaitCondition, Wake},
};
use std::collections::VecDeque;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No process {pid} in {mode}")]
    NoSuchProcess { pid: Pid, mode: Mode },
}

/// A summary of one process, as returned by the query methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub mode: Mode,
    pub kind: ProcessKind,
    /// How many times the process has been advanced
    pub runs: u64,
    /// Whether the process is suspended on a wait condition, as opposed to
    /// waiting for its first run
    pub waiting: bool,
}

struct Entry {
    pid: Pid,
    process: Box<dyn Process>,
    runs: u64,
}

impl Entry {
    fn info(&self, mode: Mode, waiting: bool) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            mode,
            kind: self.process.kind(),
            runs: self.runs,
            waiting,
        }
    }
}

struct Pool {
    next_pid: u32,
    /// Started but not yet run
    fresh: VecDeque<Entry>,
    /// Suspended, ordered by pid
    waiting: Vec<(Entry, WaitCondition)>,
    /// Ready to run during the current tick
    ready: VecDeque<(Entry, Wake)>,
}

impl Pool {
    fn new() -> Self {
        Self {
            next_pid: Pid::INIT.0 + 1,
            fresh: Default::default(),
            waiting: Default::default(),
            ready: Default::default(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = (&Entry, bool)> {
        self.fresh
            .iter()
            .map(|entry| (entry, false))
            .chain(self.ready.iter().map(|(entry, _)| (entry, false)))
            .chain(self.waiting.iter().map(|(entry, _)| (entry, true)))
    }

    fn entry_mut(&mut self, pid: Pid) -> Option<&mut Entry> {
        self.fresh
            .iter_mut()
            .chain(self.ready.iter_mut().map(|(entry, _)| entry))
            .chain(self.waiting.iter_mut().map(|(entry, _)| entry))
            .find(|entry| entry.pid == pid)
    }

    fn remove(&mut self, pid: Pid) -> Option<Entry> {
        if let Some(index) = self.fresh.iter().position(|entry| entry.pid == pid) {
            return self.fresh.remove(index);
        }
        if let Some(index) = self.ready.iter().position(|(entry, _)| entry.pid == pid) {
            return self.ready.remove(index).map(|(entry, _)| entry);
        }
        let index = self.waiting.iter().position(|(entry, _)| entry.pid == pid)?;
        Some(self.waiting.remove(index).0)
    }

    fn suspend(&mut self, entry: Entry, wait: WaitCondition) {
        let index = self
            .waiting
            .partition_point(|(other, _)| other.pid < entry.pid);
        self.waiting.insert(index, (entry, wait));
    }
}

/// The processes of one device, split into the two modes.
pub struct ProcessTable {
    user: Pool,
    kernel: Pool,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self {
            user: Pool::new(),
            kernel: Pool::new(),
        }
    }
}

impl ProcessTable {
    fn pool(&self, mode: Mode) -> &Pool {
        match mode {
            Mode::User => &self.user,
            Mode::Kernel => &self.kernel,
        }
    }

    fn pool_mut(&mut self, mode: Mode) -> &mut Pool {
        match mode {
            Mode::User => &mut self.user,
            Mode::Kernel => &mut self.kernel,
        }
    }

    /// Registers a process to run on the next tick and returns its pid.
    pub fn start(&mut self, mode: Mode, process: Box<dyn Process>) -> Pid {
        let pool = self.pool_mut(mode);
        let pid = Pid(pool.next_pid);
        pool.next_pid += 1;
        process_event(pid, mode, process.kind(), "started");
        pool.fresh.push_back(Entry {
            pid,
            process,
            runs: 0,
        });
        pid
    }

    /// Registers the init process under the reserved pid.
    fn start_init(&mut self, process: Box<dyn Process>) -> Pid {
        self.user.remove(Pid::INIT);
        process_event(Pid::INIT, Mode::User, process.kind(), "started");
        self.user.fresh.push_front(Entry {
            pid: Pid::INIT,
            process,
            runs: 0,
        });
        Pid::INIT
    }

    /// Removes a process immediately, wherever it is in its lifecycle.
    pub fn terminate(&mut self, pid: Pid, mode: Mode) -> Result<(), SchedulerError> {
        let entry = self
            .pool_mut(mode)
            .remove(pid)
            .ok_or(SchedulerError::NoSuchProcess { pid, mode })?;
        process_event(pid, mode, entry.process.kind(), "terminated");
        Ok(())
    }

    pub fn get(&self, pid: Pid, mode: Mode) -> Result<&dyn Process, SchedulerError> {
        self.pool(mode)
            .entries()
            .find(|(entry, _)| entry.pid == pid)
            .map(|(entry, _)| entry.process.as_ref())
            .ok_or(SchedulerError::NoSuchProcess { pid, mode })
    }

    pub fn get_mut(&mut self, pid: Pid, mode: Mode) -> Result<&mut dyn Process, SchedulerError> {
        self.pool_mut(mode)
            .entry_mut(pid)
            .map(|entry| entry.process.as_mut())
            .ok_or(SchedulerError::NoSuchProcess { pid, mode })
    }

    /// Lists processes ordered by mode, then pid. `None` lists both modes.
    pub fn list(&self, mode: Option<Mode>) -> Vec<ProcessInfo> {
        let mut infos: Vec<_> = Mode::ALL
            .into_iter()
            .filter(|m| mode.map_or(true, |mode| mode == *m))
            .flat_map(|m| {
                self.pool(m)
                    .entries()
                    .map(move |(entry, waiting)| entry.info(m, waiting))
            })
            .collect();
        infos.sort_by_key(|info| (info.mode, info.pid));
        infos
    }

    /// Lists the processes of the given kind.
    pub fn find(&self, kind: ProcessKind, mode: Option<Mode>) -> Vec<ProcessInfo> {
        self.list(mode)
            .into_iter()
            .filter(|info| info.kind == kind)
            .collect()
    }

    pub fn is_running(&self, kind: ProcessKind, mode: Option<Mode>) -> bool {
        Mode::ALL
            .into_iter()
            .filter(|m| mode.map_or(true, |mode| mode == *m))
            .any(|m| {
                self.pool(m)
                    .entries()
                    .any(|(entry, _)| entry.process.kind() == kind)
            })
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Owns every process of one device and decides who runs each tick.
#[derive(Default)]
pub struct ProcessScheduler {
    table: ProcessTable,
    last_tick: Option<Time>,
    ticks: u64,
}

impl ProcessScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a process in the given mode. It first runs on the next tick.
    pub fn start(&mut self, mode: Mode, process: impl Process) -> Pid {
        self.table.start(mode, Box::new(process))
    }

    pub fn start_boxed(&mut self, mode: Mode, process: Box<dyn Process>) -> Pid {
        self.table.start(mode, process)
    }

    /// Starts the init process as usermode pid 1.
    pub fn start_init(&mut self, process: impl Process) -> Pid {
        self.table.start_init(Box::new(process))
    }

    pub fn terminate(&mut self, pid: Pid, mode: Mode) -> Result<(), SchedulerError> {
        self.table.terminate(pid, mode)
    }

    pub fn get(&self, pid: Pid, mode: Mode) -> Result<&dyn Process, SchedulerError> {
        self.table.get(pid, mode)
    }

    pub fn get_mut(&mut self, pid: Pid, mode: Mode) -> Result<&mut dyn Process, SchedulerError> {
        self.table.get_mut(pid, mode)
    }

    pub fn list(&self, mode: Option<Mode>) -> Vec<ProcessInfo> {
        self.table.list(mode)
    }

    pub fn find(&self, kind: ProcessKind, mode: Option<Mode>) -> Vec<ProcessInfo> {
        self.table.find(kind, mode)
    }

    pub fn is_running(&self, kind: ProcessKind, mode: Option<Mode>) -> bool {
        self.table.is_running(kind, mode)
    }

    /// How many ticks the scheduler has completed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Drops every process and resets pid numbering.
    pub fn clear(&mut self) {
        self.table.clear();
        self.last_tick = None;
    }

    /// Runs one scheduling round. `received` holds the packets the link layer
    /// delivered since the last poll; any that arrived at or before the
    /// previous tick are ignored.
    pub fn tick(&mut self, device: &mut DeviceState, received: &[Received]) {
        let now = device.clock().now();
        let previous = self.last_tick;
        let fresh: Vec<&Received> = received
            .iter()
            .filter(|received| previous.map_or(true, |previous| received.time > previous))
            .collect();

        for mode in Mode::ALL {
            self.tick_mode(mode, device, &fresh, now);
        }

        self.last_tick = Some(now);
        self.ticks += 1;
    }

    fn tick_mode(
        &mut self,
        mode: Mode,
        device: &mut DeviceState,
        received: &[&Received],
        now: Time,
    ) {
        let pool = self.table.pool_mut(mode);

        while let Some(entry) = pool.fresh.pop_front() {
            pool.ready.push_back((entry, Wake::Started));
        }

        let mut waiting = Vec::with_capacity(pool.waiting.len());
        for (entry, wait) in pool.waiting.drain(..) {
            if wait.is_satisfied(device) {
                pool.ready.push_back((entry, Wake::Ready));
            } else {
                waiting.push(Some((entry, wait)));
            }
        }

        // Indices into `waiting`, in the order the processes matched
        let mut matched: Vec<(usize, Vec<Received>)> = Vec::new();
        for packet in received {
            for (index, slot) in waiting.iter().enumerate() {
                let Some((_, wait)) = slot else { continue };
                match matched.iter_mut().find(|(i, _)| *i == index) {
                    Some((_, packets)) => {
                        if wait.aggregates() && wait.matches_packet(packet) {
                            packets.push((*packet).clone());
                        }
                    }
                    None => {
                        if wait.matches_packet(packet) {
                            matched.push((index, vec![(*packet).clone()]));
                        }
                    }
                }
            }
        }
        for (index, packets) in matched {
            if let Some((entry, _)) = waiting[index].take() {
                pool.ready.push_back((entry, Wake::Packets(packets)));
            }
        }

        for (entry, wait) in waiting.into_iter().flatten() {
            if wait.is_elapsed(now) {
                pool.ready.push_back((entry, Wake::TimedOut));
            } else {
                pool.waiting.push((entry, wait));
            }
        }

        // Terminations during a run remove entries from `ready`, so pop one at
        // a time rather than draining up front
        while let Some((entry, wake)) = self.table.pool_mut(mode).ready.pop_front() {
            self.run(mode, entry, wake, device);
        }
    }

    fn run(&mut self, mode: Mode, mut entry: Entry, wake: Wake, device: &mut DeviceState) {
        let kind = entry.process.kind();
        let mut cx = Context::new(entry.pid, mode, kind, device, &mut self.table);
        let result = entry.process.advance(wake, &mut cx);
        let terminated = cx.terminated_self();
        entry.runs += 1;

        match result {
            Ok(Step::Wait(_)) if terminated => {
                process_event(entry.pid, mode, kind, "terminated");
            }
            Ok(Step::Wait(wait)) => self.table.pool_mut(mode).suspend(entry, wait),
            Ok(Step::Exit) => process_event(entry.pid, mode, kind, "exited"),
            Err(e) => {
                tracing::error!(
                    device = %device.name(),
                    pid = %entry.pid,
                    mode = %mode,
                    kind = ?kind,
                    "Process failed and was terminated: {}",
                    e
                );
            }
        }
    }
}
