//! The per-device socket table.
//!
//! Applications never talk to a transport process directly. They write into
//! and read out of a [`Socket`], and the transport process that owns the
//! socket moves those bytes across the network during its own ticks.

use crate::{
    clock::Time,
    packet::Endpoint,
    process::{Mode, Pid},
};
use rustc_hash::FxHashMap;
use std::{
    fmt::{self, Display},
    time::Duration,
};
use thiserror::Error as ThisError;

/// Identifies a socket within one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(pub u32);

impl Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// The connection is still being established
    Connecting,
    Open,
    /// The application asked to close and the transport is shutting down
    Closing,
    Closed,
    /// The connection could not be established or was reset
    Failed,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    #[error("No such socket: {0}")]
    NoSuchSocket(SocketId),
    #[error("Cannot write to {0} after it was closed")]
    Closed(SocketId),
}

/// One end of a connection as the application sees it.
#[derive(Debug, Clone)]
pub struct Socket {
    owner: Option<(Pid, Mode)>,
    local: Endpoint,
    remote: Option<Endpoint>,
    state: SocketState,
    /// Written by the application, not yet taken by the transport
    outgoing: Vec<u8>,
    /// Delivered by the transport, not yet read by the application
    incoming: Vec<u8>,
    eof: bool,
    close_requested: bool,
    last_activity: Time,
    max_idle: Duration,
}

impl Socket {
    /// The transport process moving this socket's bytes.
    pub fn owner(&self) -> Option<(Pid, Mode)> {
        self.owner
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    /// The peer, once known. A listening socket learns it from the first
    /// connection request.
    pub fn remote(&self) -> Option<Endpoint> {
        self.remote
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Whether the peer has finished sending and every byte it sent has been
    /// delivered.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Bytes the application wrote that the transport has not yet taken.
    pub fn pending_outgoing(&self) -> usize {
        self.outgoing.len()
    }

    /// Bytes delivered that the application has not yet read.
    pub fn available(&self) -> usize {
        self.incoming.len()
    }

    pub fn last_activity(&self) -> Time {
        self.last_activity
    }

    pub(crate) fn set_owner(&mut self, owner: Option<(Pid, Mode)>) {
        self.owner = owner;
    }

    pub(crate) fn set_remote(&mut self, remote: Endpoint) {
        self.remote = Some(remote);
    }

    pub(crate) fn set_state(&mut self, state: SocketState) {
        self.state = state;
    }

    pub(crate) fn set_eof(&mut self) {
        self.eof = true;
    }

    pub(crate) fn touch(&mut self, now: Time) {
        self.last_activity = now;
    }

    pub(crate) fn take_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    pub(crate) fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend_from_slice(bytes);
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            SocketState::Connecting | SocketState::Open | SocketState::Closing
        )
    }
}

/// Every socket of one device.
#[derive(Debug, Clone, Default)]
pub struct SocketTable {
    next_id: u32,
    sockets: FxHashMap<SocketId, Socket>,
}

impl SocketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a socket in the [`Connecting`](SocketState::Connecting) state.
    /// A connection that sees no traffic for `max_idle` becomes eligible for
    /// reaping.
    pub fn open(
        &mut self,
        local: Endpoint,
        remote: Option<Endpoint>,
        now: Time,
        max_idle: Duration,
    ) -> SocketId {
        let id = SocketId(self.next_id);
        self.next_id += 1;
        self.sockets.insert(
            id,
            Socket {
                owner: None,
                local,
                remote,
                state: SocketState::Connecting,
                outgoing: Vec::new(),
                incoming: Vec::new(),
                eof: false,
                close_requested: false,
                last_activity: now,
                max_idle,
            },
        );
        id
    }

    /// Queues bytes for the transport to send.
    pub fn write(&mut self, id: SocketId, bytes: &[u8]) -> Result<(), SocketError> {
        let socket = self.get_mut(id)?;
        if socket.close_requested || !socket.is_live() {
            return Err(SocketError::Closed(id));
        }
        socket.outgoing.extend_from_slice(bytes);
        Ok(())
    }

    /// Takes every byte delivered so far.
    pub fn read(&mut self, id: SocketId) -> Result<Vec<u8>, SocketError> {
        Ok(std::mem::take(&mut self.get_mut(id)?.incoming))
    }

    /// Asks the transport to close the connection once everything written so
    /// far has been sent.
    pub fn close(&mut self, id: SocketId) -> Result<(), SocketError> {
        self.get_mut(id)?.close_requested = true;
        Ok(())
    }

    pub fn get(&self, id: SocketId) -> Result<&Socket, SocketError> {
        self.sockets.get(&id).ok_or(SocketError::NoSuchSocket(id))
    }

    pub fn get_mut(&mut self, id: SocketId) -> Result<&mut Socket, SocketError> {
        self.sockets
            .get_mut(&id)
            .ok_or(SocketError::NoSuchSocket(id))
    }

    pub fn remove(&mut self, id: SocketId) -> Result<Socket, SocketError> {
        self.sockets
            .remove(&id)
            .ok_or(SocketError::NoSuchSocket(id))
    }

    /// The live connections that have been quiet for longer than they allow,
    /// ordered by id. Listening sockets have no peer yet and never go idle.
    pub fn idle(&self, now: Time) -> Vec<SocketId> {
        let mut idle: Vec<_> = self
            .sockets
            .iter()
            .filter(|(_, socket)| {
                socket.is_live()
                    && socket.remote.is_some()
                    && now.saturating_since(socket.last_activity) > socket.max_idle
            })
            .map(|(id, _)| *id)
            .collect();
        idle.sort();
        idle
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.sockets.clear();
    }
}
