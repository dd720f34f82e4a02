//! Blocking client: one connection, one request in flight.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, TransportError};
use crate::transcript::{Direction, FrameLog};
use crate::transport::{recv_frame, send_frame};
use i2con_proto::{BusId, Command, Frame, Payload, Status};
use log::{debug, info};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

pub struct Client {
    cfg: ClientConfig,
    stream: Option<TcpStream>,
    bus: BusId,
    last_status: Option<Status>,
    transcript: Option<FrameLog>,
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Self {
        let transcript = (cfg.transcript_capacity > 0).then(|| FrameLog::new(cfg.transcript_capacity));
        Self {
            cfg,
            stream: None,
            bus: 0,
            last_status: None,
            transcript,
        }
    }

    /// Connect to the server on `host` and bind this client to `bus`.
    ///
    /// Nothing is sent yet; the bus id travels with every request and the
    /// server opens the bus when the first one arrives.
    pub fn connect(&mut self, host: &str, bus: BusId) -> Result<()> {
        if self.stream.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let port = self.cfg.port;
        let unreachable = |source| ClientError::Unreachable {
            host: host.to_string(),
            port,
            source,
        };

        let addrs = (host, port).to_socket_addrs().map_err(|e| unreachable(Some(e)))?;
        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.cfg.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(self.cfg.nodelay).map_err(TransportError::from)?;
                    stream.set_read_timeout(self.cfg.io_timeout).map_err(TransportError::from)?;
                    stream.set_write_timeout(self.cfg.io_timeout).map_err(TransportError::from)?;
                    info!("connected to {addr} (bus {bus})");
                    self.stream = Some(stream);
                    self.bus = bus;
                    self.last_status = None;
                    return Ok(());
                }
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(unreachable(last_err))
    }

    /// Send a Disconnect frame and close the connection. Does nothing if not
    /// connected.
    pub fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let bytes = Frame::disconnect().on_bus(self.bus).encode();
        if let Some(log) = self.transcript.as_mut() {
            log.push(Direction::Tx, bytes);
        }
        if let Err(e) = send_frame(&mut stream, &bytes) {
            debug!("disconnect frame not delivered: {e}");
        }
        let _ = stream.shutdown(Shutdown::Both);
        info!("disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// Status of the most recent reply.
    pub fn last_status(&self) -> Option<Status> {
        self.last_status
    }

    pub fn transcript(&self) -> Option<&FrameLog> {
        self.transcript.as_ref()
    }

    /// One request/reply round trip. The reply's status is returned as-is.
    ///
    /// Any transport or decoding failure closes the connection, as does a
    /// BadBus reply.
    pub fn transact(&mut self, request: Frame) -> Result<Frame> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        let bytes = request.on_bus(self.bus).encode();

        let outcome = round_trip(stream, self.transcript.as_mut(), &bytes)
            .map_err(ClientError::from)
            .and_then(|reply| Frame::decode_reply(&reply).map_err(ClientError::from));
        match outcome {
            Ok(reply) => {
                self.last_status = Some(reply.status);
                if reply.status == Status::BadBus {
                    // the server closes the session after a BadBus reply
                    self.close_stream();
                }
                Ok(reply)
            }
            Err(e) => {
                self.close_stream();
                Err(e)
            }
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn read8(&mut self, address: u16, register: u8) -> Result<u8> {
        let reply = self.checked(Command::Read8, address, register, Payload::Empty)?;
        Ok(reply.payload.byte().unwrap_or_default())
    }

    pub fn read16(&mut self, address: u16, register: u8) -> Result<u16> {
        let reply = self.checked(Command::Read16, address, register, Payload::Empty)?;
        Ok(reply.payload.word().unwrap_or_default())
    }

    pub fn write8(&mut self, address: u16, register: u8, value: u8) -> Result<()> {
        self.checked(Command::Write8, address, register, Payload::Byte(value))?;
        Ok(())
    }

    pub fn write16(&mut self, address: u16, register: u8, value: u16) -> Result<()> {
        self.checked(Command::Write16, address, register, Payload::Word(value))?;
        Ok(())
    }

    fn checked(&mut self, command: Command, address: u16, register: u8, payload: Payload) -> Result<Frame> {
        let reply = self.transact(Frame::request(command, address, register, payload))?;
        debug!("{command:?} {address:#04x}/{register:#04x} -> {:?}", reply.status);
        if !reply.status.is_ok() {
            return Err(ClientError::Status {
                status: reply.status,
                command,
                address,
                register,
            });
        }
        Ok(reply)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn round_trip(
    stream: &mut TcpStream,
    mut transcript: Option<&mut FrameLog>,
    request: &[u8; i2con_proto::FRAME_SIZE],
) -> std::result::Result<[u8; i2con_proto::FRAME_SIZE], TransportError> {
    if let Some(log) = transcript.as_deref_mut() {
        log.push(Direction::Tx, *request);
    }
    send_frame(stream, request)?;
    let reply = recv_frame(stream)?;
    if let Some(log) = transcript {
        log.push(Direction::Rx, reply);
    }
    Ok(reply)
}
