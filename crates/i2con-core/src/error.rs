use i2con_proto::{Command, ProtocolError, Status};
use std::io;
use thiserror::Error;

/// Failure to move one whole frame across the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection (a transfer returned zero bytes).
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Underlying OS error code, if any.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            TransportError::Closed => None,
            TransportError::Io(e) => e.raw_os_error(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("could not connect to {host}:{port}")]
    Unreachable {
        host: String,
        port: u16,
        #[source]
        source: Option<io::Error>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed reply: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered, but the bus-level operation did not succeed.
    #[error("{command:?} on device {address:#04x} register {register:#04x}: {status}")]
    Status {
        status: Status,
        command: Command,
        address: u16,
        register: u8,
    },
}

impl ClientError {
    /// Bus-level status carried by the reply, for errors that have one.
    pub fn status(&self) -> Option<Status> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
