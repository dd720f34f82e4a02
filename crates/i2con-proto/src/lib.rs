//! Wire format shared by the i2con client and server.
//!
//! Every request and every reply is one fixed-size [`Frame`]; see [`frame`] for
//! the byte layout.

pub mod frame;

pub use frame::{BusId, Command, Frame, Payload, ProtocolError, Status, DEFAULT_PORT, FRAME_SIZE};
