//! Client and server talking over loopback TCP with simulated buses.

use i2con_core::proto::{Command, Frame, Payload, Status};
use i2con_core::transport::recv_frame;
use i2con_core::{
    shutdown_channel, Client, ClientConfig, ClientError, Direction, MemoryBus, Server, ServerConfig, ServerEvent,
    SessionEnd, ShutdownHandle,
};
use crossbeam_channel::Receiver;
use std::io;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    port: u16,
    events: Receiver<ServerEvent>,
    shutdown: ShutdownHandle,
    thread: JoinHandle<io::Result<()>>,
}

impl Running {
    fn start(sim: MemoryBus) -> Self {
        let cfg = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            accept_poll: Duration::from_millis(10),
            io_timeout: Some(TIMEOUT),
            ..Default::default()
        };
        let mut server = Server::new(sim, cfg);
        let events = server.subscribe();
        let listener = server.bind().unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown, token) = shutdown_channel();
        let thread = thread::spawn(move || server.serve(listener, &token));
        Self {
            port,
            events,
            shutdown,
            thread,
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            port: self.port,
            io_timeout: Some(TIMEOUT),
            ..Default::default()
        }
    }

    fn connect(&self, bus: i8) -> Client {
        let mut client = Client::new(self.client_config());
        client.connect("127.0.0.1", bus).unwrap();
        client
    }

    fn next_session_end(&self) -> SessionEnd {
        loop {
            match self.events.recv_timeout(TIMEOUT).unwrap() {
                ServerEvent::Disconnected(_, end) => return end,
                _ => continue,
            }
        }
    }

    fn stop(self) {
        self.shutdown.trigger();
        self.thread.join().unwrap().unwrap();
    }
}

fn sensor() -> MemoryBus {
    MemoryBus::new().with_device(1, 0x29)
}

#[test]
fn read8_returns_device_register() {
    let sim = sensor();
    sim.set_register(1, 0x29, 0x92, 0x5A);
    let server = Running::start(sim);

    let mut client = server.connect(1);
    assert_eq!(client.read8(0x29, 0x92).unwrap(), 0x5A);
    assert_eq!(client.last_status(), Some(Status::Ok));
    client.disconnect();

    assert!(matches!(server.next_session_end(), SessionEnd::Disconnected));
    server.stop();
}

#[test]
fn write16_then_read16() {
    let sim = sensor();
    let server = Running::start(sim.clone());

    let mut client = server.connect(1);
    client.write16(0x29, 0x96, 0x1234).unwrap();
    client.write8(0x29, 0x80, 0x03).unwrap();
    assert_eq!(client.read16(0x29, 0x96).unwrap(), 0x1234);
    assert_eq!(sim.register(1, 0x29, 0x96), Some(0x34));
    assert_eq!(sim.register(1, 0x29, 0x97), Some(0x12));
    assert_eq!(sim.register(1, 0x29, 0x80), Some(0x03));
    drop(client);

    server.next_session_end();
    server.stop();
}

#[test]
fn write_as_first_command_opens_the_named_bus() {
    let sim = MemoryBus::new().with_device(3, 0x40);
    let server = Running::start(sim.clone());

    let mut client = server.connect(3);
    client.write8(0x40, 0x01, 0x07).unwrap();
    assert_eq!(sim.register(3, 0x40, 0x01), Some(0x07));
    drop(client);
    server.stop();
}

#[test]
fn bad_address_is_reported_and_session_survives() {
    let server = Running::start(sensor());

    let mut client = server.connect(1);
    let err = client.read8(0x50, 0x00).unwrap_err();
    assert_eq!(err.status(), Some(Status::BadAddress));
    assert!(client.is_connected());
    assert_eq!(client.read8(0x29, 0x00).unwrap(), 0);

    let raw = client
        .transact(Frame::request(Command::Read16, 0x51, 0x00, Payload::Empty))
        .unwrap();
    assert_eq!(raw.status, Status::BadAddress);
    server.stop();
}

#[test]
fn register_failure_is_io_error() {
    let sim = sensor();
    sim.fail_register(1, 0x29, 0x10);
    let server = Running::start(sim);

    let mut client = server.connect(1);
    let err = client.write8(0x29, 0x10, 1).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Status {
            status: Status::IoError,
            command: Command::Write8,
            address: 0x29,
            register: 0x10,
        }
    ));
    client.write8(0x29, 0x11, 1).unwrap();
    server.stop();
}

#[test]
fn unavailable_bus_ends_the_session() {
    let server = Running::start(sensor());

    let mut client = server.connect(7);
    let err = client.read8(0x29, 0x00).unwrap_err();
    assert_eq!(err.status(), Some(Status::BadBus));
    assert!(!client.is_connected());
    assert!(matches!(server.next_session_end(), SessionEnd::BadBus(7)));

    let err = client.read8(0x29, 0x00).unwrap_err();
    assert!(matches!(err, ClientError::NotConnected), "{err:?}");

    client.connect("127.0.0.1", 1).unwrap();
    assert_eq!(client.read8(0x29, 0x00).unwrap(), 0);
    server.stop();
}

#[test]
fn raw_bad_bus_reply_closes_the_client() {
    let server = Running::start(sensor());

    let mut client = server.connect(9);
    let reply = client
        .transact(Frame::request(Command::Write8, 0x29, 0x00, Payload::Byte(1)))
        .unwrap();
    assert_eq!(reply.status, Status::BadBus);
    assert_eq!(client.last_status(), Some(Status::BadBus));
    assert!(!client.is_connected());
    server.stop();
}

#[test]
fn disconnect_twice_sends_one_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut frames = Vec::new();
        while let Ok(bytes) = recv_frame(&mut stream) {
            frames.push(Frame::decode_request(&bytes).unwrap());
        }
        frames
    });

    let mut client = Client::new(ClientConfig {
        port,
        ..Default::default()
    });
    client.connect("127.0.0.1", 1).unwrap();
    client.disconnect();
    client.disconnect();
    assert!(!client.is_connected());

    let frames = peer.join().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::Disconnect);
}

#[test]
fn connect_rules() {
    let server = Running::start(sensor());
    let mut client = server.connect(1);
    assert!(matches!(client.connect("127.0.0.1", 1), Err(ClientError::AlreadyConnected)));
    client.disconnect();
    client.connect("127.0.0.1", 1).unwrap();
    assert!(client.is_connected());
    drop(client);

    let closed_port = server.port;
    server.stop();
    let mut client = Client::new(ClientConfig {
        port: closed_port,
        ..Default::default()
    });
    assert!(matches!(client.connect("127.0.0.1", 1), Err(ClientError::Unreachable { .. })));
}

#[test]
fn events_follow_session_lifecycle() {
    let server = Running::start(sensor());
    assert!(matches!(server.events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Listening(_)));

    let mut client = server.connect(1);
    client.read8(0x29, 0x00).unwrap();
    assert!(matches!(server.events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Connected(_)));
    client.disconnect();
    assert!(matches!(
        server.events.recv_timeout(TIMEOUT).unwrap(),
        ServerEvent::Disconnected(_, SessionEnd::Disconnected)
    ));
    server.stop();
}

#[test]
fn concurrent_sessions_share_a_bus() {
    let sim = sensor();
    let server = Running::start(sim.clone());

    let workers: Vec<_> = (0..4u8)
        .map(|i| {
            let mut client = server.connect(1);
            thread::spawn(move || {
                for n in 0..25u8 {
                    client.write8(0x29, i, n).unwrap();
                    assert_eq!(client.read8(0x29, i).unwrap(), n);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    for i in 0..4u8 {
        assert_eq!(sim.register(1, 0x29, i), Some(24));
    }
    server.stop();
}

#[test]
fn transcript_records_each_frame() {
    let server = Running::start(sensor());
    let mut client = Client::new(ClientConfig {
        transcript_capacity: 8,
        ..server.client_config()
    });
    client.connect("127.0.0.1", 1).unwrap();
    client.read8(0x29, 0x92).unwrap();

    let log = client.transcript().unwrap();
    let entries: Vec<_> = log.entries().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].direction, Direction::Tx);
    assert_eq!(entries[0].bytes[3], Command::Read8.code());
    assert_eq!(entries[1].direction, Direction::Rx);
    server.stop();
}
