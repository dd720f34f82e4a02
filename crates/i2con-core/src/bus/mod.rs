//! Access to the local I2C buses.
//!
//! The session engine only sees these two traits. A [`BusProvider`] opens one
//! handle per session; the handle is released when dropped.

mod locks;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod memory;

pub use locks::BusLocks;
pub use memory::MemoryBus;

use i2con_proto::BusId;
use std::io;

/// An open bus on which one device at a time is selected.
pub trait Bus {
    /// Select the device subsequent register accesses go to.
    fn select_device(&mut self, address: u16) -> io::Result<()>;

    fn read_byte_data(&mut self, register: u8) -> io::Result<u8>;

    /// Read a 16-bit register in host order.
    fn read_word_data(&mut self, register: u8) -> io::Result<u16>;

    fn write_byte_data(&mut self, register: u8, value: u8) -> io::Result<()>;

    fn write_word_data(&mut self, register: u8, value: u16) -> io::Result<()>;
}

/// Opens buses by id. Shared by every session of a server, so it must not hand
/// out handles that alias each other's state.
pub trait BusProvider: Send + Sync {
    type Handle: Bus;

    fn open(&self, bus: BusId) -> io::Result<Self::Handle>;
}
