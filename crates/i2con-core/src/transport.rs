//! Whole-frame transfers over a byte stream.
//!
//! A single `read`/`write` call may move fewer bytes than asked for; both
//! directions keep going until the frame is complete. A zero-byte transfer is
//! reported as [`TransportError::Closed`], anything else as
//! [`TransportError::Io`]. Nothing is retried except calls interrupted by a
//! signal before moving any data.

use crate::error::TransportError;
use i2con_proto::FRAME_SIZE;
use log::trace;
use std::fmt;
use std::io::{ErrorKind, Read, Write};

pub fn send_frame<W: Write + ?Sized>(w: &mut W, frame: &[u8; FRAME_SIZE]) -> Result<(), TransportError> {
    let mut sent = 0;
    while sent < FRAME_SIZE {
        match w.write(&frame[sent..]) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    w.flush()?;
    trace!("TX {}", Hex(frame));
    Ok(())
}

pub fn recv_frame<R: Read + ?Sized>(r: &mut R) -> Result<[u8; FRAME_SIZE], TransportError> {
    let mut frame = [0u8; FRAME_SIZE];
    let mut received = 0;
    while received < FRAME_SIZE {
        match r.read(&mut frame[received..]) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    trace!("RX {}", Hex(&frame));
    Ok(frame)
}

struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}
