//! Server side of one connection.
//!
//! ```text
//! AwaitFirst --frame--> BusOpen --opened--> Dispatching --+
//!     |                    |                    ^         | reply sent,
//!     |                    | BadBus reply       +---------+ next frame
//!     v                    v                    |
//!   Closed <---------------+--------------------+ Disconnect, peer closed,
//!                                                 I/O or protocol error
//! ```
//!
//! The bus named by the first frame stays open for the whole session; the
//! device is selected anew for every command.

use crate::bus::{Bus, BusLocks, BusProvider};
use crate::error::TransportError;
use crate::transport::{recv_frame, send_frame};
use i2con_proto::{BusId, Command, Frame, Payload, ProtocolError, Status};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// Why a session reached its terminal state.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client sent Disconnect.
    Disconnected,
    /// The client closed the connection between frames.
    PeerClosed,
    /// The first frame named a bus that could not be opened.
    BadBus(BusId),
    /// The client sent a frame that could not be decoded.
    Protocol(ProtocolError),
    Transport(TransportError),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Disconnected => f.write_str("client disconnected"),
            SessionEnd::PeerClosed => f.write_str("connection closed by client"),
            SessionEnd::BadBus(bus) => write!(f, "bus {bus} not available"),
            SessionEnd::Protocol(e) => write!(f, "protocol violation: {e}"),
            SessionEnd::Transport(e) => write!(f, "transport failure: {e}"),
        }
    }
}

impl From<TransportError> for SessionEnd {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => SessionEnd::PeerClosed,
            other => SessionEnd::Transport(other),
        }
    }
}

struct OpenBus<H> {
    id: BusId,
    handle: H,
    lock: Arc<Mutex<()>>,
}

enum State<H> {
    AwaitFirst,
    BusOpen(Frame),
    Dispatching(OpenBus<H>, Frame),
    Closed(SessionEnd),
}

pub struct Session<'a, P> {
    provider: &'a P,
    locks: &'a BusLocks,
}

impl<'a, P: BusProvider> Session<'a, P> {
    pub fn new(provider: &'a P, locks: &'a BusLocks) -> Self {
        Self { provider, locks }
    }

    /// Serve frames from `stream` until the session closes. The bus handle is
    /// dropped before returning; closing the stream is left to the caller.
    pub fn run<S: Read + Write>(&self, stream: &mut S) -> SessionEnd {
        let mut state = State::AwaitFirst;
        loop {
            state = match state {
                State::AwaitFirst => match next_frame(stream) {
                    Ok(first) => State::BusOpen(first),
                    Err(end) => State::Closed(end),
                },
                State::BusOpen(first) => self.open_bus(stream, first),
                State::Dispatching(mut bus, frame) => {
                    match dispatch(stream, &mut bus, &frame).and_then(|()| next_frame(stream)) {
                        Ok(next) => State::Dispatching(bus, next),
                        Err(end) => {
                            debug!("releasing bus {}", bus.id);
                            State::Closed(end)
                        }
                    }
                }
                State::Closed(end) => return end,
            };
        }
    }

    fn open_bus<S: Write>(&self, stream: &mut S, first: Frame) -> State<P::Handle> {
        let id = first.bus.unwrap_or_default();
        match self.provider.open(id) {
            Ok(handle) => {
                info!("opened bus {id}");
                let bus = OpenBus {
                    id,
                    handle,
                    lock: self.locks.lock_for(id),
                };
                State::Dispatching(bus, first)
            }
            Err(e) => {
                warn!("cannot open bus {id}: {e}");
                if let Err(e) = send_frame(stream, &first.reply(Status::BadBus, first.payload).encode()) {
                    debug!("BadBus reply not delivered: {e}");
                }
                State::Closed(SessionEnd::BadBus(id))
            }
        }
    }
}

/// Receive the next request. Disconnect ends the session without a reply.
fn next_frame<S: Read>(stream: &mut S) -> Result<Frame, SessionEnd> {
    let bytes = recv_frame(stream)?;
    let frame = Frame::decode_request(&bytes).map_err(|e| {
        warn!("dropping session: {e}");
        SessionEnd::Protocol(e)
    })?;
    if frame.command == Command::Disconnect {
        return Err(SessionEnd::Disconnected);
    }
    Ok(frame)
}

fn dispatch<S: Write, B: Bus>(stream: &mut S, bus: &mut OpenBus<B>, frame: &Frame) -> Result<(), SessionEnd> {
    let reply = {
        let _guard = bus.lock.lock();
        match bus.handle.select_device(frame.address) {
            Ok(()) => execute(&mut bus.handle, frame),
            Err(e) => {
                debug!("select {:#04x} on bus {} failed: {e}", frame.address, bus.id);
                frame.reply(Status::BadAddress, frame.payload)
            }
        }
    };
    debug!(
        "{:?} {:#04x}/{:#04x} -> {:?}",
        frame.command, frame.address, frame.register, reply.status
    );
    send_frame(stream, &reply.encode())?;
    Ok(())
}

fn execute<B: Bus>(bus: &mut B, frame: &Frame) -> Frame {
    let register = frame.register;
    let outcome = match frame.command {
        Command::Read8 => bus.read_byte_data(register).map(Payload::Byte),
        Command::Read16 => bus.read_word_data(register).map(Payload::Word),
        Command::Write8 => {
            let value = frame.payload.byte().unwrap_or_default();
            bus.write_byte_data(register, value).map(|()| frame.payload)
        }
        Command::Write16 => {
            let value = frame.payload.word().unwrap_or_default();
            bus.write_word_data(register, value).map(|()| frame.payload)
        }
        // filtered out by next_frame
        Command::Disconnect => Ok(Payload::Empty),
    };
    match outcome {
        Ok(payload) => frame.reply(Status::Ok, payload),
        Err(e) => {
            debug!("{:?} register {register:#04x} failed: {e}", frame.command);
            let empty = match frame.command {
                Command::Read8 => Payload::Byte(0),
                Command::Read16 => Payload::Word(0),
                _ => frame.payload,
            };
            frame.reply(Status::IoError, empty)
        }
    }
}
