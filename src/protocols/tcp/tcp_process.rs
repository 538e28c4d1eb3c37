use super::{
    segment::{Control, TcpSegment},
    state::State,
    window::{ReceivingWindow, SendingWindow, MAX_SACK_EDGES},
};
use crate::{
    clock::Time,
    link::{PortId, Received},
    logging::segment_event,
    packet::{Endpoint, EthernetHeader, Ipv4Header, MacAddress, Packet},
    process::{Context, Process, ProcessError, ProcessKind, Step, Timeout, WaitCondition, Wake},
    protocols::sockets::{SocketId, SocketState},
};
use std::{any::Any, time::Duration};

/// The initial sequence number both ends use.
const INITIAL_SEQ: u32 = 0;

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// The largest payload this end will accept in one segment
    pub mss: u16,
    /// The number of segments this end will buffer
    pub window: u16,
    /// How long a segment may go unacknowledged before it is sent again
    pub rto: Duration,
    /// The minimum time between two data segments. Acknowledgements and
    /// handshake segments are never held back.
    pub min_send_interval: Duration,
    /// How long to wait for each handshake reply
    pub handshake_timeout: Duration,
    /// How many times to resend a handshake segment before giving up
    pub handshake_retries: u32,
    pub time_wait: Duration,
    /// How long the connection may go without traffic before the device
    /// reaps it
    pub max_idle: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mss: 1460,
            window: 64,
            rto: Duration::from_millis(200),
            min_send_interval: Duration::from_millis(10),
            handshake_timeout: Duration::from_millis(500),
            handshake_retries: 5,
            time_wait: Duration::from_millis(400),
            max_idle: Duration::from_secs(60),
        }
    }
}

impl TcpConfig {
    pub fn mss(mut self, mss: u16) -> Self {
        self.mss = mss;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn rto(mut self, rto: Duration) -> Self {
        self.rto = rto;
        self
    }

    pub fn min_send_interval(mut self, interval: Duration) -> Self {
        self.min_send_interval = interval;
        self
    }

    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Role {
    Client,
    Server,
}

/// One end of a connection.
///
/// A client sends the first SYN as soon as it runs; a server waits for one
/// and then serves only that peer. Either way the process exits once the
/// connection is closed, leaving its socket in
/// [`Closed`](SocketState::Closed) or [`Failed`](SocketState::Failed).
#[derive(Debug)]
pub struct TcpProcess {
    config: TcpConfig,
    role: Role,
    socket: SocketId,
    local: Endpoint,
    remote: Option<Endpoint>,
    /// The port and next hop frames to the peer leave through
    link: Option<(PortId, MacAddress)>,
    state: State,
    /// Handshake segments sent so far
    attempts: u32,
    /// When the handshake retry or TIME-WAIT period ends
    deadline: Option<Time>,
    /// The negotiated maximum segment size
    mss: usize,
    sending: SendingWindow,
    receiving: ReceivingWindow,
    /// Data queued before the connection was established
    unsent: Vec<u8>,
    fin_queued: bool,
    pending_ack: bool,
    /// The pending acknowledgement answers a duplicate
    ack_echo: bool,
    last_transmit: Option<Time>,
}

impl TcpProcess {
    /// Creates the active end of a connection to `remote`.
    pub fn client(socket: SocketId, local: Endpoint, remote: Endpoint, config: TcpConfig) -> Self {
        Self::new(Role::Client, socket, local, Some(remote), config)
    }

    /// Creates the passive end of a connection, accepting the first peer to
    /// reach `local`.
    pub fn server(socket: SocketId, local: Endpoint, config: TcpConfig) -> Self {
        Self::new(Role::Server, socket, local, None, config)
    }

    fn new(
        role: Role,
        socket: SocketId,
        local: Endpoint,
        remote: Option<Endpoint>,
        config: TcpConfig,
    ) -> Self {
        Self {
            role,
            socket,
            local,
            remote,
            link: None,
            state: State::Closed,
            attempts: 0,
            deadline: None,
            mss: config.mss as usize,
            sending: SendingWindow::new(config.window as usize, INITIAL_SEQ + 1),
            receiving: ReceivingWindow::new(config.window as usize),
            unsent: Vec::new(),
            fin_queued: false,
            pending_ack: false,
            ack_echo: false,
            last_transmit: None,
            config,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    pub fn remote(&self) -> Option<Endpoint> {
        self.remote
    }

    pub fn src_port(&self) -> u16 {
        self.local.port
    }

    /// The peer's port, or zero while a server is still listening.
    pub fn dst_port(&self) -> u16 {
        self.remote.map_or(0, |remote| remote.port)
    }

    /// The next byte this end will send.
    pub fn sequence_number(&self) -> u32 {
        self.sending.sequence_number()
    }

    /// The next byte this end expects from the peer.
    pub fn ack_number(&self) -> u32 {
        self.receiving.ack_number()
    }

    /// The negotiated maximum segment size.
    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn sending_window(&self) -> &SendingWindow {
        &self.sending
    }

    pub fn receiving_window(&self) -> &ReceivingWindow {
        &self.receiving
    }

    /// How many handshake segments have been sent.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Queues data for the peer. Data queued before the handshake completes
    /// is held until it does.
    pub fn send_data(&mut self, data: &[u8]) {
        self.unsent.extend_from_slice(data);
        if self.state.can_send() && !self.fin_queued && !self.unsent.is_empty() {
            let unsent = std::mem::take(&mut self.unsent);
            self.sending.push_data(&unsent, self.mss);
        }
    }

    fn step(&mut self, wake: Wake, cx: &mut Context<'_>) -> Result<Step, ProcessError> {
        match wake {
            Wake::Started => self.open(cx)?,
            wake => {
                for received in wake.into_packets() {
                    self.segment_arrives(&received, cx)?;
                    if self.state == State::Closed {
                        break;
                    }
                }
            }
        }
        if self.state != State::Closed {
            self.check_deadline(cx)?;
        }
        if self.state != State::Closed {
            self.pump(cx)?;
        }
        if self.state == State::Closed {
            self.finish(cx);
            return Ok(Step::Exit);
        }
        Ok(Step::Wait(self.wait_condition(cx.now())))
    }

    fn open(&mut self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        match self.role {
            Role::Client => {
                let remote = self.peer()?;
                let neighbor = cx
                    .device()
                    .neighbor(remote.address)
                    .ok_or(ProcessError::NoNeighbor(remote.address))?;
                self.link = Some((neighbor.port, neighbor.mac));
                self.send_handshake(cx, false)?;
                self.enter_handshake(State::SynSent, cx.now());
            }
            Role::Server => self.state = State::Listen,
        }
        Ok(())
    }

    fn enter_handshake(&mut self, state: State, now: Time) {
        self.state = state;
        self.attempts = 1;
        self.deadline = Some(now + self.config.handshake_timeout);
    }

    fn segment_arrives(
        &mut self,
        received: &Received,
        cx: &mut Context<'_>,
    ) -> Result<(), ProcessError> {
        let (Some(ip), Some(segment)) = (received.packet.ipv4(), received.packet.tcp()) else {
            return Ok(());
        };
        let now = cx.now();
        segment_event(cx.device().name(), "in", segment);
        cx.device_mut()
            .sockets_mut()
            .get_mut(self.socket)?
            .touch(now);

        match self.state {
            State::Closed => Ok(()),
            State::Listen => {
                if !segment.ctl.syn() || segment.ctl.ack() || segment.ctl.rst() {
                    return Ok(());
                }
                let remote = Endpoint::new(ip.src, segment.src_port);
                let mac = received
                    .packet
                    .ethernet()
                    .map(|header| header.src)
                    .ok_or_else(|| ProcessError::Protocol("SYN without a link layer".into()))?;
                self.remote = Some(remote);
                self.link = Some((received.port, mac));
                cx.device_mut()
                    .sockets_mut()
                    .get_mut(self.socket)?
                    .set_remote(remote);
                self.receiving.synchronize(segment.seq);
                self.negotiate(segment);
                self.send_handshake(cx, false)?;
                self.enter_handshake(State::SynReceived, now);
                Ok(())
            }
            State::SynSent => {
                if segment.ctl.rst() {
                    return Err(ProcessError::ResetDuringHandshake(self.peer()?));
                }
                if segment.ctl.syn() && segment.ctl.ack() && segment.ack == INITIAL_SEQ + 1 {
                    self.receiving.synchronize(segment.seq);
                    self.negotiate(segment);
                    self.establish(cx)?;
                    self.pending_ack = true;
                }
                Ok(())
            }
            State::SynReceived => {
                if segment.ctl.rst() {
                    return Err(ProcessError::ResetDuringHandshake(self.peer()?));
                }
                if segment.ctl.syn() && !segment.ctl.ack() {
                    // Our SYN-ACK was lost
                    return self.send_handshake(cx, true);
                }
                if segment.ctl.ack() && segment.ack == INITIAL_SEQ + 1 {
                    self.establish(cx)?;
                    self.synchronized(segment, cx)?;
                }
                Ok(())
            }
            _ => self.synchronized(segment, cx),
        }
    }

    fn establish(&mut self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        self.state = State::Established;
        self.deadline = None;
        cx.device_mut()
            .sockets_mut()
            .get_mut(self.socket)?
            .set_state(SocketState::Open);
        tracing::info!(
            device = %cx.device().name(),
            local = %self.local,
            remote = ?self.remote,
            mss = self.mss,
            window = self.sending.capacity(),
            "connection established"
        );
        Ok(())
    }

    /// Takes the smaller of each side's segment size and window.
    fn negotiate(&mut self, segment: &TcpSegment) {
        let peer_mss = segment.mss.unwrap_or(self.config.mss);
        self.mss = self.config.mss.min(peer_mss).max(1) as usize;
        let window = self.config.window.min(segment.window).max(1);
        self.sending.set_capacity(window as usize);
    }

    fn synchronized(
        &mut self,
        segment: &TcpSegment,
        cx: &mut Context<'_>,
    ) -> Result<(), ProcessError> {
        let now = cx.now();
        if segment.ctl.rst() {
            tracing::warn!(device = %cx.device().name(), local = %self.local, "connection reset");
            cx.device_mut()
                .sockets_mut()
                .get_mut(self.socket)?
                .set_state(SocketState::Failed);
            self.state = State::Closed;
            return Ok(());
        }
        if segment.ctl.syn() {
            // The peer never saw our handshake acknowledgement
            self.pending_ack = true;
            return Ok(());
        }
        if segment.ctl.ack() {
            self.handle_ack(segment, now);
        }
        if segment.seg_len() > 0 {
            let receipt = self
                .receiving
                .receive(segment.seq, &segment.payload, segment.ctl.fin());
            self.pending_ack = true;
            self.ack_echo |= receipt.duplicate;
            let socket = cx.device_mut().sockets_mut().get_mut(self.socket)?;
            if !receipt.delivered.is_empty() {
                socket.push_incoming(&receipt.delivered);
            }
            if receipt.fin {
                socket.set_eof();
                self.fin_received(now);
            }
        }
        Ok(())
    }

    fn handle_ack(&mut self, segment: &TcpSegment, now: Time) {
        let acknowledged = self.sending.acknowledge(segment.ack);
        self.sending.mark_sacked(&segment.sack);
        if !acknowledged.iter().any(|outbound| outbound.fin) {
            return;
        }
        match self.state {
            State::FinWait1 => self.state = State::FinWait2,
            State::Closing => self.enter_time_wait(now),
            State::LastAck => self.state = State::Closed,
            _ => {}
        }
    }

    fn fin_received(&mut self, now: Time) {
        match self.state {
            State::Established => self.state = State::CloseWait,
            State::FinWait1 => self.state = State::Closing,
            State::FinWait2 => self.enter_time_wait(now),
            _ => {}
        }
    }

    fn enter_time_wait(&mut self, now: Time) {
        self.state = State::TimeWait;
        self.deadline = Some(now + self.config.time_wait);
    }

    fn check_deadline(&mut self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        let now = cx.now();
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Ok(()),
        }
        match self.state {
            State::SynSent | State::SynReceived => {
                if self.attempts > self.config.handshake_retries {
                    return Err(ProcessError::HandshakeTimedOut {
                        remote: self.peer()?,
                        attempts: self.attempts,
                    });
                }
                self.attempts += 1;
                self.send_handshake(cx, true)?;
                self.deadline = Some(now + self.config.handshake_timeout);
            }
            State::TimeWait => {
                self.state = State::Closed;
                self.deadline = None;
            }
            _ => self.deadline = None,
        }
        Ok(())
    }

    /// Moves application data into the window and sends whatever is due.
    fn pump(&mut self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        if !self.state.is_synchronized() {
            return Ok(());
        }
        let now = cx.now();
        if self.state.can_send() {
            let socket = cx.device_mut().sockets_mut().get_mut(self.socket)?;
            let data = socket.take_outgoing();
            if !data.is_empty() {
                socket.touch(now);
            }
            self.send_data(&data);
            if socket.close_requested() && !self.fin_queued {
                socket.set_state(SocketState::Closing);
                self.sending.push_fin();
                self.fin_queued = true;
                self.state = match self.state {
                    State::CloseWait => State::LastAck,
                    _ => State::FinWait1,
                };
            }
        }

        self.sending.refill();
        self.sending.schedule_retransmissions(now, self.config.rto);
        if self.pending_ack {
            self.send_ack(cx)?;
        }
        self.send_paced(cx, now)
    }

    fn send_paced(&mut self, cx: &mut Context<'_>, now: Time) -> Result<(), ProcessError> {
        loop {
            if let Some(last) = self.last_transmit {
                if now.saturating_since(last) < self.config.min_send_interval {
                    return Ok(());
                }
            }
            let Some(outbound) = self.sending.next_due(now) else {
                return Ok(());
            };
            let ctl = if outbound.fin {
                Control::ACK | Control::FIN
            } else {
                Control::ACK
            };
            let segment = self
                .segment(outbound.seq, ctl)?
                .retransmission(outbound.is_retransmission())
                .payload(outbound.payload);
            self.transmit(cx, segment)?;
            self.last_transmit = Some(now);
        }
    }

    fn send_ack(&mut self, cx: &mut Context<'_>) -> Result<(), ProcessError> {
        let segment = self
            .segment(self.sending.sequence_number(), Control::ACK)?
            .retransmission(self.ack_echo);
        self.pending_ack = false;
        self.ack_echo = false;
        self.transmit(cx, segment)
    }

    fn send_handshake(&mut self, cx: &mut Context<'_>, retransmission: bool) -> Result<(), ProcessError> {
        let remote = self.peer()?;
        let segment = match self.role {
            Role::Client => TcpSegment::new(self.local.port, remote.port, INITIAL_SEQ, 0, Control::SYN),
            Role::Server => TcpSegment::new(
                self.local.port,
                remote.port,
                INITIAL_SEQ,
                self.receiving.ack_number(),
                Control::SYN | Control::ACK,
            ),
        }
        .window(self.config.window)
        .mss(self.config.mss)
        .retransmission(retransmission);
        self.transmit(cx, segment)
    }

    /// A segment carrying the current acknowledgement state.
    fn segment(&self, seq: u32, ctl: Control) -> Result<TcpSegment, ProcessError> {
        let remote = self.peer()?;
        let sack = self
            .receiving
            .sack_edges()
            .iter()
            .take(MAX_SACK_EDGES)
            .copied()
            .collect();
        Ok(
            TcpSegment::new(self.local.port, remote.port, seq, self.receiving.ack_number(), ctl)
                .window(self.receiving.advertised())
                .sack(sack),
        )
    }

    fn transmit(&mut self, cx: &mut Context<'_>, segment: TcpSegment) -> Result<(), ProcessError> {
        let remote = self.peer()?;
        let (port, dst) = self
            .link
            .ok_or_else(|| ProcessError::Protocol(format!("no link toward {remote}")))?;
        let src = cx.device().ports().interface(port)?.mac();
        segment_event(cx.device().name(), "out", &segment);
        let packet = Packet::new(EthernetHeader { src, dst })
            .with(Ipv4Header::new(self.local.address, remote.address))
            .with(segment);
        // Frames lost here are recovered by retransmission
        cx.send(port, packet);
        let now = cx.now();
        cx.device_mut()
            .sockets_mut()
            .get_mut(self.socket)?
            .touch(now);
        Ok(())
    }

    fn wait_condition(&self, now: Time) -> WaitCondition {
        let matcher = Self::matcher(self.local, self.remote);
        match self.state {
            State::Listen => WaitCondition::packet(matcher),
            State::SynSent | State::SynReceived => WaitCondition::packets(matcher)
                .timeout(self.deadline.map_or(Timeout::next_tick(now), Timeout::at)),
            _ => WaitCondition::packets(matcher).timeout(Timeout::next_tick(now)),
        }
    }

    /// Accepts segments for this connection. Without a peer, only connection
    /// requests to the local endpoint match.
    fn matcher(local: Endpoint, remote: Option<Endpoint>) -> impl Fn(&Received) -> bool {
        move |received: &Received| {
            let (Some(ip), Some(segment)) = (received.packet.ipv4(), received.packet.tcp()) else {
                return false;
            };
            if ip.dst != local.address || segment.dst_port != local.port {
                return false;
            }
            match remote {
                Some(remote) => ip.src == remote.address && segment.src_port == remote.port,
                None => segment.ctl.syn() && !segment.ctl.ack(),
            }
        }
    }

    /// Collapses both windows and releases the socket.
    fn finish(&mut self, cx: &mut Context<'_>) {
        self.sending
            .reset(self.config.window as usize, INITIAL_SEQ + 1);
        self.receiving.reset();
        self.unsent.clear();
        self.fin_queued = false;
        self.pending_ack = false;
        self.deadline = None;
        if let Ok(socket) = cx.device_mut().sockets_mut().get_mut(self.socket) {
            if socket.state() != SocketState::Failed {
                socket.set_state(SocketState::Closed);
            }
            socket.set_owner(None);
        }
        tracing::info!(device = %cx.device().name(), local = %self.local, "connection closed");
    }

    fn peer(&self) -> Result<Endpoint, ProcessError> {
        self.remote
            .ok_or_else(|| ProcessError::Protocol("connection has no peer yet".into()))
    }
}

impl Process for TcpProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Tcp
    }

    fn advance(&mut self, wake: Wake, cx: &mut Context<'_>) -> Result<Step, ProcessError> {
        let result = self.step(wake, cx);
        if result.is_err() {
            self.state = State::Closed;
            if let Ok(socket) = cx.device_mut().sockets_mut().get_mut(self.socket) {
                socket.set_state(SocketState::Failed);
                socket.set_owner(None);
            }
        }
        result
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
