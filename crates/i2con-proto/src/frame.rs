//! Frame layout and codec.
//!
//! ```text
//! offset  size  field
//!      0     2  address   u16, little-endian
//!      2     1  register
//!      3     1  command
//!      4     1  status    i8, replies only
//!      5     3  reserved  zero on send, ignored on receive
//!      8     4  length    u32, little-endian, always FRAME_SIZE
//!     12     4  data      byte | word (big-endian) | bus id
//! ```
//!
//! On requests without a value the bus id is `data[0]`; on write requests,
//! where `data[0..2]` holds the value, the bus id is `data[3]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of one frame on the wire.
pub const FRAME_SIZE: usize = 16;

/// Well-known TCP port of the server.
pub const DEFAULT_PORT: u16 = 3490;

/// Identifier of an I2C bus on the server host (`/dev/i2c-<id>`).
pub type BusId = i8;

const DATA: usize = 12;
// Slot for the bus id when data[0..2] holds a write value.
const WRITE_BUS_SLOT: usize = DATA + 3;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command code {0:#04x}")]
    UnknownCommand(u8),
    #[error("unknown status code {0}")]
    UnknownStatus(i8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Disconnect = 0x02,
    Read8 = 0x03,
    Read16 = 0x04,
    Write8 = 0x05,
    Write16 = 0x06,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_write(self) -> bool {
        matches!(self, Command::Write8 | Command::Write16)
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x02 => Command::Disconnect,
            0x03 => Command::Read8,
            0x04 => Command::Read16,
            0x05 => Command::Write8,
            0x06 => Command::Write16,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

/// Outcome of a command, set by the server on replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum Status {
    Ok = 0,
    /// The requested bus could not be opened. The server closes the session.
    BadBus = -1,
    /// The device address could not be selected on the open bus.
    BadAddress = -2,
    /// The register transfer failed.
    IoError = -3,
}

impl Status {
    pub fn code(self) -> i8 {
        self as i8
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl TryFrom<i8> for Status {
    type Error = ProtocolError;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Status::Ok,
            -1 => Status::BadBus,
            -2 => Status::BadAddress,
            -3 => Status::IoError,
            other => return Err(ProtocolError::UnknownStatus(other)),
        })
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Ok => "ok",
            Status::BadBus => "bus not available",
            Status::BadAddress => "device address not selectable",
            Status::IoError => "register transfer failed",
        })
    }
}

/// Value carried in the data area, selected by the command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Empty,
    Byte(u8),
    Word(u16),
}

impl Payload {
    pub fn byte(self) -> Option<u8> {
        match self {
            Payload::Byte(b) => Some(b),
            _ => None,
        }
    }

    pub fn word(self) -> Option<u16> {
        match self {
            Payload::Word(w) => Some(w),
            _ => None,
        }
    }

    fn decode(command: Command, data: &[u8]) -> Self {
        match command {
            Command::Read8 | Command::Write8 => Payload::Byte(data[0]),
            Command::Read16 | Command::Write16 => Payload::Word(u16::from_be_bytes([data[0], data[1]])),
            Command::Disconnect => Payload::Empty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Target device address; 10-bit addresses are allowed.
    pub address: u16,
    pub register: u8,
    pub command: Command,
    pub status: Status,
    pub payload: Payload,
    /// Bus the session should open. Only the first frame of a session is
    /// consulted; always `None` on replies.
    pub bus: Option<BusId>,
}

impl Frame {
    pub fn request(command: Command, address: u16, register: u8, payload: Payload) -> Self {
        Self {
            address,
            register,
            command,
            status: Status::Ok,
            payload,
            bus: None,
        }
    }

    pub fn disconnect() -> Self {
        Self::request(Command::Disconnect, 0, 0, Payload::Empty)
    }

    pub fn on_bus(mut self, bus: BusId) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Reply to this request: target and command are kept, status and payload
    /// are replaced.
    pub fn reply(&self, status: Status, payload: Payload) -> Self {
        Self {
            status,
            payload,
            bus: None,
            ..*self
        }
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0..2].copy_from_slice(&self.address.to_le_bytes());
        buf[2] = self.register;
        buf[3] = self.command.code();
        buf[4] = self.status.code() as u8;
        buf[8..12].copy_from_slice(&(FRAME_SIZE as u32).to_le_bytes());
        match self.payload {
            Payload::Empty => {}
            Payload::Byte(b) => buf[DATA] = b,
            Payload::Word(w) => buf[DATA..DATA + 2].copy_from_slice(&w.to_be_bytes()),
        }
        if let Some(bus) = self.bus {
            let slot = if self.payload == Payload::Empty { DATA } else { WRITE_BUS_SLOT };
            buf[slot] = bus as u8;
        }
        buf
    }

    /// Decode a frame sent by a client. `status` is not meaningful on requests
    /// and is ignored.
    pub fn decode_request(buf: &[u8; FRAME_SIZE]) -> Result<Self, ProtocolError> {
        let command = Command::try_from(buf[3])?;
        let (payload, slot) = match command {
            Command::Write8 | Command::Write16 => (Payload::decode(command, &buf[DATA..]), WRITE_BUS_SLOT),
            _ => (Payload::Empty, DATA),
        };
        Ok(Self {
            address: u16::from_le_bytes([buf[0], buf[1]]),
            register: buf[2],
            command,
            status: Status::Ok,
            payload,
            bus: Some(buf[slot] as BusId),
        })
    }

    pub fn decode_reply(buf: &[u8; FRAME_SIZE]) -> Result<Self, ProtocolError> {
        let command = Command::try_from(buf[3])?;
        Ok(Self {
            address: u16::from_le_bytes([buf[0], buf[1]]),
            register: buf[2],
            command,
            status: Status::try_from(buf[4] as i8)?,
            payload: Payload::decode(command, &buf[DATA..]),
            bus: None,
        })
    }

    /// The `length` field as sent by the peer. Receivers do not act on it.
    pub fn declared_length(buf: &[u8; FRAME_SIZE]) -> u32 {
        u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]])
    }
}
