use super::*;
use crate::{
    packet::{Endpoint, EthernetHeader, Ipv4Address, Ipv4Header, Packet},
    process::{Mode, Pid, ProcessKind},
    protocols::sockets::{SocketId, SocketState},
    DeviceId, Internet,
};
use std::time::Duration;
use tracing_test::traced_test;

const CLIENT_IP: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
const SERVER_IP: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);
const CLIENT: Endpoint = Endpoint::new(CLIENT_IP, 5000);
const SERVER: Endpoint = Endpoint::new(SERVER_IP, 80);

fn tcp(internet: &Internet, device: DeviceId, pid: Pid) -> Option<&TcpProcess> {
    internet.device(device).get_as::<TcpProcess>(pid, Mode::Kernel)
}

fn socket_state(internet: &Internet, device: DeviceId, socket: SocketId) -> Option<SocketState> {
    internet
        .device(device)
        .sockets()
        .get(socket)
        .ok()
        .map(|socket| socket.state())
}

/// Two hosts on one wire. Only the client knows how to reach the other end;
/// the server learns its peer from the SYN.
fn hosts(loss: Option<(f64, u64)>) -> (Internet, DeviceId, DeviceId) {
    let mut internet = Internet::new();
    let client = internet.add_host("client");
    let server = internet.add_host("server");
    let (client_port, server_port) = match loss {
        Some((rate, seed)) => internet.link_lossy(client, server, rate, seed),
        None => internet.link(client, server),
    };
    let server_mac = internet.mac(server, server_port).expect("server port exists");
    internet
        .device_mut(client)
        .add_neighbor(SERVER_IP, server_mac, client_port);
    (internet, client, server)
}

struct Connection {
    internet: Internet,
    client: DeviceId,
    server: DeviceId,
    client_socket: SocketId,
    server_socket: SocketId,
    client_pid: Pid,
    server_pid: Pid,
}

impl Connection {
    fn open(client_config: TcpConfig, server_config: TcpConfig, loss: Option<(f64, u64)>) -> Self {
        let (mut internet, client, server) = hosts(loss);
        let (server_socket, server_pid) = internet.device_mut(server).listen_tcp(SERVER, server_config);
        let (client_socket, client_pid) = internet
            .device_mut(client)
            .connect_tcp(CLIENT, SERVER, client_config);
        Self {
            internet,
            client,
            server,
            client_socket,
            server_socket,
            client_pid,
            server_pid,
        }
    }

    fn client(&self) -> Option<&TcpProcess> {
        tcp(&self.internet, self.client, self.client_pid)
    }

    fn server(&self) -> Option<&TcpProcess> {
        tcp(&self.internet, self.server, self.server_pid)
    }

    fn run_until_established(&mut self) {
        let (client, client_pid) = (self.client, self.client_pid);
        let (server, server_pid) = (self.server, self.server_pid);
        let established = self.internet.run_until(
            |internet| {
                [(client, client_pid), (server, server_pid)]
                    .into_iter()
                    .all(|(device, pid)| {
                        tcp(internet, device, pid)
                            .is_some_and(|tcp| tcp.state() == State::Established)
                    })
            },
            1_000,
        );
        assert!(established, "handshake did not complete");
    }

    /// Writes `data` on the client, then ticks until the server has read all
    /// of it. Returns what the server read.
    fn transfer(&mut self, data: &[u8], max_ticks: u64) -> Vec<u8> {
        self.internet
            .device_mut(self.client)
            .sockets_mut()
            .write(self.client_socket, data)
            .expect("client socket is open");
        self.read_on_server(data.len(), max_ticks)
    }

    fn read_on_server(&mut self, len: usize, max_ticks: u64) -> Vec<u8> {
        let mut received = Vec::new();
        for _ in 0..max_ticks {
            if received.len() >= len {
                break;
            }
            self.internet.tick();
            let bytes = self
                .internet
                .device_mut(self.server)
                .sockets_mut()
                .read(self.server_socket)
                .expect("server socket exists");
            received.extend(bytes);
        }
        received
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn handshake_synchronizes_both_ends() {
    let mut conn = Connection::open(TcpConfig::default(), TcpConfig::default(), None);
    conn.run_until_established();

    let client = conn.client().expect("client is running");
    assert_eq!((client.src_port(), client.dst_port()), (5000, 80));
    assert_eq!(client.ack_number(), 1);
    assert_eq!(client.sequence_number(), 1);
    assert!(client.is_client());

    let server = conn.server().expect("server is running");
    assert_eq!(server.remote(), Some(CLIENT));
    assert_eq!((server.src_port(), server.dst_port()), (80, 5000));
    assert_eq!(server.ack_number(), 1);
    assert_eq!(server.attempts(), 1);

    assert_eq!(
        socket_state(&conn.internet, conn.client, conn.client_socket),
        Some(SocketState::Open)
    );
    let server_socket = conn
        .internet
        .device(conn.server)
        .sockets()
        .get(conn.server_socket)
        .expect("server socket exists");
    assert_eq!(server_socket.remote(), Some(CLIENT));
    assert_eq!(server_socket.state(), SocketState::Open);
}

#[test]
fn segment_size_and_window_take_the_smaller_side() {
    let mut conn = Connection::open(
        TcpConfig::default().mss(100).window(20),
        TcpConfig::default().mss(200).window(8),
        None,
    );
    conn.run_until_established();
    for tcp in [conn.client(), conn.server()] {
        let tcp = tcp.expect("connection is running");
        assert_eq!(tcp.mss(), 100);
        assert_eq!(tcp.sending_window().capacity(), 8);
    }
}

#[test]
fn data_is_split_into_segments() {
    let config = TcpConfig::default().mss(100).window(20);
    let mut conn = Connection::open(config.clone(), config, None);
    conn.run_until_established();

    let data = pattern(250);
    conn.internet
        .device_mut(conn.client)
        .sockets_mut()
        .write(conn.client_socket, &data)
        .expect("client socket is open");
    conn.internet.tick();

    let segments: Vec<_> = conn
        .client()
        .expect("client is running")
        .sending_window()
        .segments()
        .map(|outbound| (outbound.seq, outbound.payload.len()))
        .collect();
    assert_eq!(segments, vec![(1, 100), (101, 100), (201, 50)]);

    assert_eq!(conn.read_on_server(data.len(), 100), data);
    assert_eq!(conn.server().map(TcpProcess::ack_number), Some(251));
    let (client, client_pid) = (conn.client, conn.client_pid);
    assert!(conn.internet.run_until(
        |internet| {
            tcp(internet, client, client_pid).is_some_and(|tcp| tcp.sending_window().is_drained())
        },
        100
    ));
}

#[test]
fn data_written_during_the_handshake_is_held() {
    let mut conn = Connection::open(TcpConfig::default(), TcpConfig::default(), None);
    let data = pattern(3000);
    assert_eq!(conn.transfer(&data, 200), data);
}

#[test]
fn lossy_transfer_completes_in_order() {
    let config = TcpConfig::default().mss(100).window(16);
    let mut conn = Connection::open(config.clone(), config, Some((0.1, 7)));
    conn.run_until_established();

    let data = pattern(5000);
    conn.internet
        .device_mut(conn.client)
        .sockets_mut()
        .write(conn.client_socket, &data)
        .expect("client socket is open");

    let mut received = Vec::new();
    let mut last_una = 0;
    let mut last_ack = 0;
    for _ in 0..10_000 {
        if received.len() >= data.len() {
            break;
        }
        conn.internet.tick();
        received.extend(
            conn.internet
                .device_mut(conn.server)
                .sockets_mut()
                .read(conn.server_socket)
                .expect("server socket exists"),
        );

        // Neither end ever moves its acknowledgement point backwards
        let una = conn
            .client()
            .expect("client is running")
            .sending_window()
            .oldest_unacknowledged();
        let ack = conn.server().expect("server is running").ack_number();
        assert!(una >= last_una, "sender went back from {last_una} to {una}");
        assert!(ack >= last_ack, "receiver went back from {last_ack} to {ack}");
        last_una = una;
        last_ack = ack;
    }
    assert_eq!(received, data);
}

#[test]
fn close_walks_both_ends_to_closed() {
    let mut conn = Connection::open(TcpConfig::default(), TcpConfig::default(), None);
    conn.run_until_established();
    let data = pattern(500);
    assert_eq!(conn.transfer(&data, 100), data);

    conn.internet
        .device_mut(conn.client)
        .sockets_mut()
        .close(conn.client_socket)
        .expect("client socket exists");
    let (client, client_pid) = (conn.client, conn.client_pid);
    let (server, server_pid, server_socket) = (conn.server, conn.server_pid, conn.server_socket);
    assert!(conn.internet.run_until(
        |internet| tcp(internet, server, server_pid).is_some_and(|tcp| tcp.state() == State::CloseWait),
        100
    ));
    assert!(conn
        .internet
        .device(server)
        .sockets()
        .get(server_socket)
        .is_ok_and(|socket| socket.is_eof()));
    assert!(conn.internet.run_until(
        |internet| tcp(internet, client, client_pid).is_some_and(|tcp| tcp.state() == State::FinWait2),
        100
    ));

    conn.internet
        .device_mut(server)
        .sockets_mut()
        .close(server_socket)
        .expect("server socket exists");
    assert!(conn.internet.run_until(
        |internet| tcp(internet, client, client_pid).is_some_and(|tcp| tcp.state() == State::TimeWait),
        100
    ));

    // The passive end is done as soon as its FIN is acknowledged, the active
    // end only after TIME-WAIT
    assert!(conn.internet.run_until(
        |internet| !internet.device(server).is_running(ProcessKind::Tcp, None),
        100
    ));
    assert!(conn.client().is_some());
    assert!(conn.internet.run_until(
        |internet| !internet.device(client).is_running(ProcessKind::Tcp, None),
        100
    ));
    assert_eq!(
        socket_state(&conn.internet, client, conn.client_socket),
        Some(SocketState::Closed)
    );
    assert_eq!(
        socket_state(&conn.internet, server, server_socket),
        Some(SocketState::Closed)
    );
    assert!(conn
        .internet
        .device_mut(client)
        .sockets_mut()
        .write(conn.client_socket, b"late")
        .is_err());
}

#[test]
fn handshake_gives_up_without_a_listener() {
    let (mut internet, client, _server) = hosts(None);
    let config = TcpConfig {
        handshake_timeout: Duration::from_millis(50),
        handshake_retries: 3,
        ..Default::default()
    };
    let (socket, pid) = internet.device_mut(client).connect_tcp(CLIENT, SERVER, config);

    internet.run_ticks(10);
    assert_eq!(
        tcp(&internet, client, pid).map(|tcp| tcp.state()),
        Some(State::SynSent)
    );
    assert!(internet.run_until(
        |internet| !internet.device(client).is_running(ProcessKind::Tcp, None),
        100
    ));
    assert_eq!(socket_state(&internet, client, socket), Some(SocketState::Failed));
    let owner = internet
        .device(client)
        .sockets()
        .get(socket)
        .map(|socket| socket.owner());
    assert_eq!(owner, Ok(None));
}

#[test]
#[traced_test]
fn unknown_peers_fail_the_socket() {
    let mut internet = Internet::new();
    let client = internet.add_host("client");
    let (socket, _) = internet
        .device_mut(client)
        .connect_tcp(CLIENT, SERVER, TcpConfig::default());
    internet.tick();
    assert_eq!(socket_state(&internet, client, socket), Some(SocketState::Failed));
    assert!(logs_contain("No neighbor entry for 10.0.0.2"));
}

#[test]
fn idle_connections_are_reaped() {
    let config = TcpConfig::default().max_idle(Duration::from_millis(200));
    let mut conn = Connection::open(config.clone(), config, None);
    conn.run_until_established();

    let (client, server) = (conn.client, conn.server);
    assert!(conn.internet.run_until(
        |internet| {
            [client, server]
                .into_iter()
                .all(|device| !internet.device(device).is_running(ProcessKind::Tcp, None))
        },
        100
    ));
    assert_eq!(
        socket_state(&conn.internet, client, conn.client_socket),
        Some(SocketState::Closed)
    );
    assert_eq!(
        socket_state(&conn.internet, server, conn.server_socket),
        Some(SocketState::Closed)
    );
}

#[test]
#[traced_test]
fn reset_during_handshake_fails_the_socket() {
    let mut internet = Internet::new();
    let client = internet.add_host("client");
    let server = internet.add_host("server");
    let (client_port, server_port) = internet.link(client, server);
    let client_mac = internet.mac(client, client_port).expect("client port exists");
    let server_mac = internet.mac(server, server_port).expect("server port exists");
    internet
        .device_mut(client)
        .add_neighbor(SERVER_IP, server_mac, client_port);
    let (socket, pid) = internet
        .device_mut(client)
        .connect_tcp(CLIENT, SERVER, TcpConfig::default());
    internet.tick();
    assert_eq!(
        tcp(&internet, client, pid).map(|tcp| tcp.state()),
        Some(State::SynSent)
    );

    // Nothing listens on the server, so it refuses the connection
    let reset = Packet::new(EthernetHeader {
        src: server_mac,
        dst: client_mac,
    })
    .with(Ipv4Header::new(SERVER_IP, CLIENT_IP))
    .with(TcpSegment::new(
        SERVER.port,
        CLIENT.port,
        0,
        1,
        Control::RST | Control::ACK,
    ));
    assert!(internet
        .device_mut(server)
        .state_mut()
        .ports_mut()
        .send(server_port, reset));
    internet.tick();

    assert!(!internet.device(client).is_running(ProcessKind::Tcp, None));
    assert_eq!(socket_state(&internet, client, socket), Some(SocketState::Failed));
    assert!(logs_contain("was reset during the handshake"));
}

#[test]
fn listeners_are_never_idle() {
    let (mut internet, client, server) = hosts(None);
    let config = TcpConfig::default().max_idle(Duration::from_millis(200));
    let (socket, pid) = internet.device_mut(server).listen_tcp(SERVER, config.clone());
    internet.run_ticks(50);
    assert_eq!(
        tcp(&internet, server, pid).map(|tcp| tcp.state()),
        Some(State::Listen)
    );
    assert_eq!(socket_state(&internet, server, socket), Some(SocketState::Connecting));

    // A client that shows up late is still served
    internet.device_mut(client).connect_tcp(CLIENT, SERVER, config);
    assert!(internet.run_until(
        |internet| tcp(internet, server, pid).is_some_and(|tcp| tcp.state() == State::Established),
        20
    ));
}

#[test]
fn retransmitting_connections_are_not_idle() {
    let config = TcpConfig::default()
        .rto(Duration::from_millis(50))
        .max_idle(Duration::from_millis(200));
    let mut conn = Connection::open(config.clone(), config, None);
    conn.run_until_established();

    // The peer vanishes, so nothing is received from here on
    conn.internet.device_mut(conn.server).power_off();
    conn.internet
        .device_mut(conn.client)
        .sockets_mut()
        .write(conn.client_socket, b"anyone there?")
        .expect("client socket is open");
    conn.internet.run_ticks(60);

    let client = conn.client().expect("client is still running");
    assert_eq!(client.state(), State::Established);
    let transmissions = client
        .sending_window()
        .segments()
        .next()
        .map(|segment| segment.transmissions);
    assert!(transmissions.is_some_and(|count| count > 3), "{transmissions:?}");
    assert_eq!(
        socket_state(&conn.internet, conn.client, conn.client_socket),
        Some(SocketState::Open)
    );
}

#[test]
fn listeners_ignore_other_ports() {
    let (mut internet, client, server) = hosts(None);
    let (_, server_pid) = internet
        .device_mut(server)
        .listen_tcp(Endpoint::new(SERVER_IP, 8080), TcpConfig::default());
    internet
        .device_mut(client)
        .connect_tcp(CLIENT, SERVER, TcpConfig::default());
    internet.run_ticks(20);
    assert_eq!(
        tcp(&internet, server, server_pid).map(|tcp| tcp.state()),
        Some(State::Listen)
    );
}
